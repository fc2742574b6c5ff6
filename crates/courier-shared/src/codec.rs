//! Prefix + JSON envelope framing.
//!
//! Every frame on the wire is one UTF-8 line: a fixed prefix naming the
//! payload kind, followed by a JSON [`Envelope`] whose `payload` field is
//! itself a JSON document. Byte fields inside payloads are base64 strings
//! in transit.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CodecError;

/// The closed set of frame kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    NewMessage,
    MessageUpdated,
    Action,
    Result,
    ConnectionTerminated,
    VerifyPasswordSecret,
    InitConnect,
}

impl FrameKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::NewMessage => "new-message:",
            Self::MessageUpdated => "message-updated:",
            Self::Action => "action:",
            Self::Result => "result:",
            Self::ConnectionTerminated => "connection-terminated:",
            Self::VerifyPasswordSecret => "verify-password-secret:",
            Self::InitConnect => "init-connect:",
        }
    }

    const ALL: [FrameKind; 7] = [
        Self::NewMessage,
        Self::MessageUpdated,
        Self::Action,
        Self::Result,
        Self::ConnectionTerminated,
        Self::VerifyPasswordSecret,
        Self::InitConnect,
    ];
}

/// Split a raw frame into its kind and the envelope JSON that follows the
/// prefix. Unknown prefixes yield `None`; the caller drops the frame.
pub fn classify(line: &str) -> Option<(FrameKind, &str)> {
    FrameKind::ALL
        .iter()
        .find_map(|kind| line.strip_prefix(kind.prefix()).map(|rest| (*kind, rest)))
}

/// The JSON envelope carried after every prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Random correlation id, echoed back in `result` frames.
    pub message_uuid: String,
    /// The embedded payload, serialized as its own JSON document.
    pub payload: String,
}

/// Serialize a payload, wrap it in an envelope with a fresh correlation
/// id, and prepend the kind's prefix.
pub fn encode_frame<T: Serialize>(kind: FrameKind, payload: &T) -> Result<String, CodecError> {
    encode_frame_with_uuid(kind, &Uuid::new_v4().to_string(), payload)
}

/// Like [`encode_frame`] but with an explicit correlation id (used for
/// `result` frames answering a specific client frame).
pub fn encode_frame_with_uuid<T: Serialize>(
    kind: FrameKind,
    message_uuid: &str,
    payload: &T,
) -> Result<String, CodecError> {
    let payload_json = serde_json::to_string(payload)?;
    let envelope = Envelope {
        message_uuid: message_uuid.to_string(),
        payload: payload_json,
    };
    Ok(format!("{}{}", kind.prefix(), serde_json::to_string(&envelope)?))
}

/// Parse the envelope that follows a recognized prefix.
pub fn decode_envelope(rest: &str) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_str(rest)?)
}

/// Parse the payload embedded in an envelope into its target type.
pub fn decode_payload<T: DeserializeOwned>(envelope: &Envelope) -> Result<T, CodecError> {
    Ok(serde_json::from_str(&envelope.payload)?)
}

/// Strip a known prefix and fully decode envelope + payload in one step.
pub fn decode_frame<T: DeserializeOwned>(
    kind: FrameKind,
    line: &str,
) -> Result<(Envelope, T), CodecError> {
    let rest = line
        .strip_prefix(kind.prefix())
        .ok_or(CodecError::UnknownPrefix)?;
    let envelope = decode_envelope(rest)?;
    let payload = decode_payload(&envelope)?;
    Ok((envelope, payload))
}

/// Serde helper for byte fields: base64 strings in transit.
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::WireAction;

    #[test]
    fn test_frame_roundtrip() {
        let action = WireAction {
            action_type: 2,
            args: vec!["group".into(), "New Name".into()],
        };

        let line = encode_frame(FrameKind::Action, &action).unwrap();
        assert!(line.starts_with("action:"));

        let (kind, rest) = classify(&line).unwrap();
        assert_eq!(kind, FrameKind::Action);

        let envelope = decode_envelope(rest).unwrap();
        let decoded: WireAction = decode_payload(&envelope).unwrap();
        assert_eq!(decoded.action_type, 2);
        assert_eq!(decoded.args, vec!["group".to_string(), "New Name".to_string()]);
    }

    #[test]
    fn test_correlation_id_is_preserved() {
        let line = encode_frame_with_uuid(FrameKind::Result, "abc-123", &vec![6]).unwrap();
        let (_, rest) = classify(&line).unwrap();
        let envelope = decode_envelope(rest).unwrap();
        assert_eq!(envelope.message_uuid, "abc-123");
    }

    #[test]
    fn test_unknown_prefix_is_not_classified() {
        assert!(classify("mystery-frame:{}").is_none());
        assert!(classify("").is_none());
    }

    #[test]
    fn test_malformed_envelope_is_an_error() {
        let result = decode_frame::<WireAction>(FrameKind::Action, "action:not json");
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        let line = encode_frame(FrameKind::Action, &"just a string").unwrap();
        let (kind, rest) = classify(&line).unwrap();
        assert_eq!(kind, FrameKind::Action);
        let envelope = decode_envelope(rest).unwrap();
        assert!(decode_payload::<WireAction>(&envelope).is_err());
    }
}
