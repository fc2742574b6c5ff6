//! Archive change detection.
//!
//! The archive is owned by the desktop client, which gives no change
//! notifications, so the relay polls the file's mtime and runs a diff
//! cycle whenever it moves. Each cycle reloads the connection, takes a
//! bounded snapshot, and compares it against the previous one; the
//! snapshot pointer is only replaced when the whole cycle succeeded, so
//! a failed cycle is retried implicitly on the next poll.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use courier_shared::constants::MESSAGE_COUNT_LIMIT;
use courier_store::{
    messages_equivalent, DatabaseSnapshot, Message, MessageStore, RelayLedger,
};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::manager::DeviceManager;
use crate::outbound::OutboundMessage;
use crate::push::PushSender;

/// Whether the relay can keep running after a cycle.
#[derive(Debug, PartialEq, Eq)]
pub enum WatchOutcome {
    Continue,
    /// The archive itself is gone; without it the relay is useless.
    Fatal,
}

pub struct ChangeDetector {
    config: Arc<ServerConfig>,
    manager: Arc<DeviceManager>,
    store: Arc<Mutex<MessageStore>>,
    ledger: Arc<Mutex<RelayLedger>>,
    push: Arc<dyn PushSender>,
    last_snapshot: Mutex<DatabaseSnapshot>,
}

impl ChangeDetector {
    pub fn new(
        config: Arc<ServerConfig>,
        manager: Arc<DeviceManager>,
        store: Arc<Mutex<MessageStore>>,
        ledger: Arc<Mutex<RelayLedger>>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        Self {
            config,
            manager,
            store,
            ledger,
            push,
            last_snapshot: Mutex::new(DatabaseSnapshot::empty()),
        }
    }

    /// Take the baseline snapshot without relaying anything. Messages
    /// already in the archive at startup are not "new".
    pub fn prime(&self) -> WatchOutcome {
        let mut store = self.store.lock().expect("store lock poisoned");
        if let Err(error) = store.reload() {
            tracing::error!(%error, "cannot open archive for baseline snapshot");
            return WatchOutcome::Fatal;
        }
        match store.messages_by_amount(MESSAGE_COUNT_LIMIT) {
            Ok(messages) => {
                let snapshot = DatabaseSnapshot::from_messages(messages);
                tracing::info!(messages = snapshot.len(), "baseline snapshot taken");
                *self.last_snapshot.lock().expect("snapshot lock poisoned") = snapshot;
            }
            Err(error) => {
                tracing::error!(%error, "baseline snapshot failed, starting empty");
            }
        }
        WatchOutcome::Continue
    }

    /// Run one diff cycle. Called whenever the archive file changed.
    pub fn on_store_changed(&self) -> WatchOutcome {
        let mut store = self.store.lock().expect("store lock poisoned");
        if let Err(error) = store.reload() {
            tracing::error!(%error, "archive reload failed, stopping relay");
            return WatchOutcome::Fatal;
        }

        match self.diff_cycle(&store) {
            Ok(snapshot) => {
                *self.last_snapshot.lock().expect("snapshot lock poisoned") = snapshot;
            }
            Err(error) => {
                // keep the old snapshot so the next poll retries this diff
                tracing::error!(%error, "change-detection cycle failed");
            }
        }
        WatchOutcome::Continue
    }

    fn diff_cycle(&self, store: &MessageStore) -> Result<DatabaseSnapshot> {
        let messages = store.messages_by_amount(MESSAGE_COUNT_LIMIT)?;
        let snapshot = DatabaseSnapshot::from_messages(messages);
        let previous = self
            .last_snapshot
            .lock()
            .expect("snapshot lock poisoned")
            .clone();

        for message in snapshot.messages() {
            if message.is_empty() {
                continue;
            }
            match previous.get(&message.guid) {
                None => self.handle_new_message(store, message)?,
                Some(known) if !messages_equivalent(known, message) => {
                    tracing::debug!(guid = %message.guid, "message updated");
                    let outbound = self.resolve(store, message)?;
                    self.manager.broadcast_message_updated(&outbound);
                }
                Some(_) => {}
            }
        }

        Ok(snapshot)
    }

    fn handle_new_message(&self, store: &MessageStore, message: &Message) -> Result<()> {
        {
            let ledger = self.ledger.lock().expect("ledger lock poisoned");
            ledger.record_message(&message.guid, message.from_me)?;
        }

        let outbound = self.resolve(store, message)?;
        if message.from_me {
            tracing::debug!(guid = %message.guid, "locally sent message confirmed");
            self.manager.broadcast_message_updated(&outbound);
        } else {
            tracing::debug!(guid = %message.guid, "new incoming message");
            self.notify_push_targets(message);
            self.manager.broadcast_new_message(&outbound);
        }
        Ok(())
    }

    /// Push to every registered token bound to the served account. One
    /// failing token lookup never blocks the rest.
    fn notify_push_targets(&self, message: &Message) {
        let ledger = self.ledger.lock().expect("ledger lock poisoned");
        let tokens = match ledger.all_tokens() {
            Ok(tokens) => tokens,
            Err(error) => {
                tracing::warn!(%error, "cannot list push tokens");
                return;
            }
        };

        for token in tokens {
            match ledger.email_for_token(&token) {
                Ok(Some(email))
                    if email.eq_ignore_ascii_case(&self.config.account_email) =>
                {
                    self.push.send_notification(&token, message);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%token, %error, "push token lookup failed");
                }
            }
        }
    }

    fn resolve(&self, store: &MessageStore, message: &Message) -> Result<Arc<OutboundMessage>> {
        let chat = store.chat_by_guid(&message.chat_guid)?;
        Ok(Arc::new(OutboundMessage {
            message: message.clone(),
            chat,
        }))
    }
}

/// Poll the archive file's mtime and run a diff cycle on every change.
/// Returns when the detector reports a fatal condition.
///
/// Cycles touch sqlite and the filesystem, so each one runs on the
/// blocking pool instead of a runtime worker.
pub async fn watch_archive(detector: Arc<ChangeDetector>, archive_path: PathBuf, interval: Duration) {
    let primer = Arc::clone(&detector);
    match tokio::task::spawn_blocking(move || primer.prime()).await {
        Ok(WatchOutcome::Continue) => {}
        Ok(WatchOutcome::Fatal) => return,
        Err(error) => {
            tracing::error!(%error, "baseline snapshot task failed");
            return;
        }
    }

    let mut last_modified: Option<SystemTime> = None;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let modified = match std::fs::metadata(&archive_path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(error) => {
                tracing::debug!(%error, "archive metadata unavailable");
                continue;
            }
        };
        if last_modified == Some(modified) {
            continue;
        }
        last_modified = Some(modified);

        let cycle = Arc::clone(&detector);
        match tokio::task::spawn_blocking(move || cycle.on_store_changed()).await {
            Ok(WatchOutcome::Continue) => {}
            Ok(WatchOutcome::Fatal) => return,
            Err(error) => {
                tracing::error!(%error, "change-detection task failed");
                return;
            }
        }
    }
}
