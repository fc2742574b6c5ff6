//! # courier-store
//!
//! Read-side access to the desktop message archive (sqlite, polled by the
//! relay server) plus the server-owned relay ledger database:
//!
//! - `archive` - [`MessageStore`]: connection management and the queries
//!   the relay needs (recent messages, chat lookup, last message per chat)
//! - `snapshot` - bounded point-in-time captures of the archive and the
//!   field-level equivalence used to diff them
//! - `ledger` - outbound/inbound tracking and the push-token registry
//! - `models` - the store-side view of messages, attachments, and chats

pub mod archive;
pub mod error;
pub mod ledger;
pub mod models;
pub mod snapshot;

pub use archive::MessageStore;
pub use error::{Result, StoreError};
pub use ledger::RelayLedger;
pub use models::{Attachment, Chat, Message};
pub use snapshot::{messages_equivalent, DatabaseSnapshot};
