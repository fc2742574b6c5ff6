//! Archive message → wire payload conversion.
//!
//! Each outbound frame is encrypted at send time: the text and every
//! attachment body get their own freshly generated key pair, so no two
//! frames ever share key material. An unreadable attachment is skipped
//! with a warning rather than holding back the message.

use courier_shared::crypto;
use courier_shared::payloads::{
    EncryptedFileData, EncryptedText, WireAttachment, WireChat, WireMessage,
};
use courier_store::{Attachment, Chat, Message};

use crate::error::Result;

/// A message resolved for broadcast: the archive row plus its chat, when
/// the chat could still be looked up.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub message: Message,
    pub chat: Option<Chat>,
}

/// Build the encrypted wire form of a message.
pub fn to_wire_message(outbound: &OutboundMessage) -> Result<WireMessage> {
    let message = &outbound.message;

    let text_keys = crypto::generate_keys()?;
    let encrypted_text = EncryptedText {
        encrypted_text: crypto::encrypt_string(message.text.as_deref().unwrap_or(""), &text_keys)?,
        key: text_keys.to_string(),
    };

    let mut attachments = Vec::with_capacity(message.attachments.len());
    for attachment in &message.attachments {
        match encrypt_attachment(attachment) {
            Ok(wire) => attachments.push(wire),
            Err(error) => {
                tracing::warn!(
                    guid = %attachment.guid,
                    path = %attachment.path,
                    %error,
                    "skipping unreadable attachment"
                );
            }
        }
    }

    Ok(WireMessage {
        guid: message.guid.clone(),
        chat: wire_chat(outbound),
        handle: message.handle.clone(),
        encrypted_text,
        attachments,
        date_sent: message.date_sent.map(|d| d.timestamp_millis()),
        date_delivered: message.date_delivered.map(|d| d.timestamp_millis()),
        date_read: message.date_read.map(|d| d.timestamp_millis()),
        from_me: message.from_me,
        errored: message.errored,
        finished: message.finished,
    })
}

fn encrypt_attachment(attachment: &Attachment) -> Result<WireAttachment> {
    let bytes = std::fs::read(&attachment.path)?;
    let keys = crypto::generate_keys()?;
    let bundle = crypto::encrypt_bytes(&bytes, &keys)?;

    Ok(WireAttachment {
        guid: attachment.guid.clone(),
        transfer_name: attachment.transfer_name.clone(),
        file_data: EncryptedFileData {
            iv_mac: bundle.joined_iv_and_mac(),
            encrypted_data: bundle.ciphertext,
            key: keys.to_string(),
        },
    })
}

fn wire_chat(outbound: &OutboundMessage) -> WireChat {
    match &outbound.chat {
        Some(Chat::Peer { guid, peer_handle }) => WireChat {
            guid: guid.clone(),
            display_name: None,
            participants: vec![peer_handle.clone()],
        },
        Some(Chat::Group {
            guid,
            display_name,
            participants,
        }) => WireChat {
            guid: guid.clone(),
            display_name: display_name.clone(),
            participants: participants.clone(),
        },
        // chat row already gone from the archive; fall back to what the
        // message itself knows
        None => WireChat {
            guid: outbound.message.chat_guid.clone(),
            display_name: None,
            participants: vec![outbound.message.handle.clone()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use courier_shared::crypto::{decrypt_bytes, decrypt_string, CipherBytesIvMac, SecretKeys};
    use std::io::Write;

    fn message() -> Message {
        Message {
            guid: "m-1".to_string(),
            chat_guid: "c-1".to_string(),
            handle: "alice@example.com".to_string(),
            text: Some("hello there".to_string()),
            attachments: Vec::new(),
            date_sent: Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()),
            date_delivered: None,
            date_read: None,
            from_me: false,
            errored: false,
            finished: true,
        }
    }

    #[test]
    fn test_text_is_encrypted_and_recoverable() {
        let outbound = OutboundMessage {
            message: message(),
            chat: Some(Chat::Peer {
                guid: "c-1".to_string(),
                peer_handle: "alice@example.com".to_string(),
            }),
        };

        let wire = to_wire_message(&outbound).unwrap();
        assert_ne!(wire.encrypted_text.encrypted_text, "hello there");

        let keys: SecretKeys = wire.encrypted_text.key.parse().unwrap();
        let text = decrypt_string(&wire.encrypted_text.encrypted_text, &keys).unwrap();
        assert_eq!(text, "hello there");
        assert_eq!(wire.date_sent, Some(1_700_000_000_000));
    }

    #[test]
    fn test_attachment_encrypted_under_own_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.png");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"fake image bytes").unwrap();

        let mut msg = message();
        msg.attachments.push(Attachment {
            guid: "a-1".to_string(),
            transfer_name: "photo.png".to_string(),
            path: path.to_string_lossy().into_owned(),
        });

        let outbound = OutboundMessage {
            message: msg,
            chat: None,
        };
        let wire = to_wire_message(&outbound).unwrap();
        assert_eq!(wire.attachments.len(), 1);

        let file_data = &wire.attachments[0].file_data;
        assert_ne!(file_data.key, wire.encrypted_text.key);

        let keys: SecretKeys = file_data.key.parse().unwrap();
        let bundle =
            CipherBytesIvMac::from_parts(file_data.encrypted_data.clone(), &file_data.iv_mac)
                .unwrap();
        assert_eq!(decrypt_bytes(&bundle, &keys).unwrap(), b"fake image bytes");
    }

    #[test]
    fn test_missing_attachment_is_skipped() {
        let mut msg = message();
        msg.attachments.push(Attachment {
            guid: "a-1".to_string(),
            transfer_name: "gone.png".to_string(),
            path: "/nonexistent/gone.png".into(),
        });

        let wire = to_wire_message(&OutboundMessage {
            message: msg,
            chat: None,
        })
        .unwrap();
        assert!(wire.attachments.is_empty());
    }

    #[test]
    fn test_missing_chat_falls_back_to_handle() {
        let wire = to_wire_message(&OutboundMessage {
            message: message(),
            chat: None,
        })
        .unwrap();
        assert_eq!(wire.chat.guid, "c-1");
        assert_eq!(wire.chat.participants, vec!["alice@example.com".to_string()]);
    }
}
