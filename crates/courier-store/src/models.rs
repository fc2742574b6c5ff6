//! Store-side view of the message archive.
//!
//! Every struct derives `Serialize` and `Deserialize` so the server can
//! hand them to outbound serialization workers directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One message as read from the archive.
///
/// Text and attachment content are treated as immutable once a GUID
/// exists; only the timestamp triple and the errored/finished flags can
/// change between polls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Archive-assigned globally unique id.
    pub guid: String,
    /// GUID of the chat this message belongs to.
    pub chat_guid: String,
    /// Sender (or recipient, for outgoing) handle.
    pub handle: String,
    /// Message text, absent for attachment-only messages.
    pub text: Option<String>,
    /// Attachments, in archive order.
    pub attachments: Vec<Attachment>,
    pub date_sent: Option<DateTime<Utc>>,
    pub date_delivered: Option<DateTime<Utc>>,
    pub date_read: Option<DateTime<Utc>>,
    /// Whether this message was authored locally.
    pub from_me: bool,
    /// Whether the desktop client reported a send error.
    pub errored: bool,
    /// Whether the desktop client finished processing the message.
    pub finished: bool,
}

impl Message {
    /// True when there is nothing to relay: no text and no attachments
    /// (pure metadata rows).
    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty) && self.attachments.is_empty()
    }
}

/// An attachment referenced by a message, stored on disk by the archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub guid: String,
    /// File name used when transferring to a client.
    pub transfer_name: String,
    /// Absolute path of the file on the desktop.
    pub path: String,
}

/// A conversation in the archive: either a 1:1 peer chat or a group chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Chat {
    Peer {
        guid: String,
        peer_handle: String,
    },
    Group {
        guid: String,
        display_name: Option<String>,
        participants: Vec<String>,
    },
}

impl Chat {
    pub fn guid(&self) -> &str {
        match self {
            Chat::Peer { guid, .. } => guid,
            Chat::Group { guid, .. } => guid,
        }
    }
}
