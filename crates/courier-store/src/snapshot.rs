//! Bounded archive snapshots and the diff equivalence between them.
//!
//! A snapshot captures the most recent messages at one poll instant; the
//! change-detection loop diffs the newest snapshot against the previous
//! one and discards the old one afterwards.

use std::collections::HashMap;

use courier_shared::constants::MESSAGE_COUNT_LIMIT;

use crate::models::Message;

/// Immutable point-in-time capture of the most recent archive messages,
/// keyed by GUID and bounded by [`MESSAGE_COUNT_LIMIT`].
#[derive(Debug, Clone, Default)]
pub struct DatabaseSnapshot {
    messages: HashMap<String, Message>,
}

impl DatabaseSnapshot {
    /// Build a snapshot from a newest-first message list, keeping at most
    /// [`MESSAGE_COUNT_LIMIT`] entries.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let messages = messages
            .into_iter()
            .take(MESSAGE_COUNT_LIMIT)
            .map(|m| (m.guid.clone(), m))
            .collect();
        Self { messages }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, guid: &str) -> Option<&Message> {
        self.messages.get(guid)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }
}

/// Field-level equivalence used for diffing two sightings of one GUID.
///
/// Defined over the timestamp triple (each independently null-or-equal),
/// the errored flag, and the finished flag. Text and attachment content
/// are immutable once a GUID exists, so they are excluded by contract.
pub fn messages_equivalent(one: &Message, two: &Message) -> bool {
    one.date_sent == two.date_sent
        && one.date_delivered == two.date_delivered
        && one.date_read == two.date_read
        && one.errored == two.errored
        && one.finished == two.finished
}
