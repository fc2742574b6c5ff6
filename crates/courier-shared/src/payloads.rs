//! Typed payloads carried inside wire frames.
//!
//! Field names follow the historical JSON wire format (camelCase); byte
//! fields are base64 in transit via [`crate::codec::base64_bytes`].

use serde::{Deserialize, Serialize};

use crate::codec::base64_bytes;

/// A ciphertext string paired with the key string that encrypts it.
///
/// `encrypted_text` is an `iv:mac:ciphertext` bundle string and `key` is
/// an `aesKey:hmacKey` pair string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedText {
    pub encrypted_text: String,
    pub key: String,
}

/// Server→client handshake challenge: the shared secret encrypted under a
/// freshly generated key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyChallenge {
    pub encrypted_secret: String,
    pub keys: String,
}

/// Client→server handshake payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitConnect {
    pub email: EncryptedText,
    pub password: EncryptedText,
    pub build_version: i32,
    pub device_type: String,
    pub device_id: String,
}

/// Chat descriptor inside a message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChat {
    pub guid: String,
    pub display_name: Option<String>,
    pub participants: Vec<String>,
}

/// Encrypted attachment body plus the material needed to decrypt it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedFileData {
    #[serde(with = "base64_bytes")]
    pub encrypted_data: Vec<u8>,
    pub key: String,
    /// `base64(iv):base64(mac)` for the attachment bytes.
    pub iv_mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAttachment {
    pub guid: String,
    pub transfer_name: String,
    pub file_data: EncryptedFileData,
}

/// A full message as it travels in `new-message` / `message-updated`
/// frames, in either direction. Text and attachment bodies are encrypted
/// independently, each under its own key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub guid: String,
    pub chat: WireChat,
    pub handle: String,
    pub encrypted_text: EncryptedText,
    pub attachments: Vec<WireAttachment>,
    pub date_sent: Option<i64>,
    pub date_delivered: Option<i64>,
    pub date_read: Option<i64>,
    pub from_me: bool,
    pub errored: bool,
    pub finished: bool,
}

/// A non-message command (rename group, leave group, ...) executed via the
/// automation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAction {
    pub action_type: i32,
    pub args: Vec<String>,
}

/// Result codes answering one client frame, correlated by the uuid of the
/// envelope that carried it. One logical send may yield several codes, in
/// call order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResult {
    pub correlation_uuid: String,
    pub result: Vec<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_connect_wire_format_is_camel_case() {
        let init = InitConnect {
            email: EncryptedText {
                encrypted_text: "civ".into(),
                key: "k".into(),
            },
            password: EncryptedText {
                encrypted_text: "civ2".into(),
                key: "k2".into(),
            },
            build_version: 7,
            device_type: "android".into(),
            device_id: "device-1".into(),
        };

        let json = serde_json::to_string(&init).unwrap();
        assert!(json.contains("\"buildVersion\":7"));
        assert!(json.contains("\"deviceType\":\"android\""));
        assert!(json.contains("\"encryptedText\""));
    }

    #[test]
    fn test_attachment_bytes_are_base64_in_transit() {
        let attachment = WireAttachment {
            guid: "a-1".into(),
            transfer_name: "photo.png".into(),
            file_data: EncryptedFileData {
                encrypted_data: vec![0, 1, 2, 255],
                key: "k".into(),
                iv_mac: "iv:mac".into(),
            },
        };

        let json = serde_json::to_string(&attachment).unwrap();
        assert!(json.contains("\"encryptedData\":\"AAEC/w==\""));

        let restored: WireAttachment = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.file_data.encrypted_data, vec![0, 1, 2, 255]);
    }
}
