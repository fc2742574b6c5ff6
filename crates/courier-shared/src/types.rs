use serde::{Deserialize, Serialize};

/// Platform of a connecting client. Unknown tags map to `Unsupported`,
/// which the handshake rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Android,
    Ios,
    Unsupported,
}

impl DeviceType {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "android" => Self::Android,
            "ios" => Self::Ios,
            _ => Self::Unsupported,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Why a connection was terminated. The numeric code travels in the
/// `connection-terminated` frame so the peer can distinguish a graceful
/// server shutdown from a network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum DisconnectReason {
    Error = 0,
    ServerClosed = 1,
    Forced = 2,
    ClientDisconnected = 3,
    AlreadyConnected = 4,
    InvalidLogin = 5,
    IncorrectVersion = 6,
}

impl DisconnectReason {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Error),
            1 => Some(Self::ServerClosed),
            2 => Some(Self::Forced),
            3 => Some(Self::ClientDisconnected),
            4 => Some(Self::AlreadyConnected),
            5 => Some(Self::InvalidLogin),
            6 => Some(Self::IncorrectVersion),
            _ => None,
        }
    }
}

/// Result code of one automation call, relayed back to the client in a
/// `result` frame. One frame may carry several codes (one per underlying
/// send performed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ReturnType {
    InvalidNumber = 0,
    NumberNotImessage = 1,
    GroupChatNotFound = 2,
    ServiceNotAvailable = 3,
    AssistiveAccessDisabled = 4,
    UiError = 5,
    ActionPerformed = 6,
    NullMessage = 7,
    Sent = 8,
}

impl ReturnType {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::InvalidNumber),
            1 => Some(Self::NumberNotImessage),
            2 => Some(Self::GroupChatNotFound),
            3 => Some(Self::ServiceNotAvailable),
            4 => Some(Self::AssistiveAccessDisabled),
            5 => Some(Self::UiError),
            6 => Some(Self::ActionPerformed),
            7 => Some(Self::NullMessage),
            8 => Some(Self::Sent),
            _ => None,
        }
    }
}

/// Automation actions the relay can execute against the desktop messaging
/// client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ActionType {
    SendMessage = 0,
    SendGroupMessage = 1,
    RenameGroup = 2,
    AddParticipant = 3,
    RemoveParticipant = 4,
    LeaveGroup = 5,
}

impl ActionType {
    pub fn code(&self) -> i32 {
        *self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::SendMessage),
            1 => Some(Self::SendGroupMessage),
            2 => Some(Self::RenameGroup),
            3 => Some(Self::AddParticipant),
            4 => Some(Self::RemoveParticipant),
            5 => Some(Self::LeaveGroup),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_tags() {
        assert_eq!(DeviceType::from_tag("android"), DeviceType::Android);
        assert_eq!(DeviceType::from_tag("Android"), DeviceType::Android);
        assert_eq!(DeviceType::from_tag("ios"), DeviceType::Ios);
        assert_eq!(DeviceType::from_tag("windows"), DeviceType::Unsupported);
    }

    #[test]
    fn test_disconnect_reason_codes_roundtrip() {
        for reason in [
            DisconnectReason::Error,
            DisconnectReason::ServerClosed,
            DisconnectReason::Forced,
            DisconnectReason::ClientDisconnected,
            DisconnectReason::AlreadyConnected,
            DisconnectReason::InvalidLogin,
            DisconnectReason::IncorrectVersion,
        ] {
            assert_eq!(DisconnectReason::from_code(reason.code()), Some(reason));
        }
        assert_eq!(DisconnectReason::from_code(99), None);
    }

    #[test]
    fn test_action_type_codes_roundtrip() {
        for action in [
            ActionType::SendMessage,
            ActionType::SendGroupMessage,
            ActionType::RenameGroup,
            ActionType::AddParticipant,
            ActionType::RemoveParticipant,
            ActionType::LeaveGroup,
        ] {
            assert_eq!(ActionType::from_code(action.code()), Some(action));
        }
    }
}
