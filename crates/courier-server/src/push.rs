//! Push-notification dispatch seam.
//!
//! The change-detection loop hands newly seen incoming messages to a
//! [`PushSender`] per registered token. Delivery failures are the
//! sender's problem to log; one bad token never blocks the rest.

use courier_store::Message;

pub trait PushSender: Send + Sync {
    fn send_notification(&self, token: &str, message: &Message);
}

/// Sender that only records the dispatch in the log. Used when no push
/// transport is configured.
pub struct LoggingPushSender;

impl PushSender for LoggingPushSender {
    fn send_notification(&self, token: &str, message: &Message) {
        tracing::info!(
            token = %token,
            guid = %message.guid,
            chat = %message.chat_guid,
            "push notification dispatched"
        );
    }
}
