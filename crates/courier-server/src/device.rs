//! Per-connection device state.
//!
//! A [`Device`] is the server's handle on one connected client. All of
//! its mutable identity lives behind a single lock; liveness and
//! handshake-progress flags are atomics. Outbound traffic goes through an
//! unbounded queue drained by the connection's writer task, so any task
//! holding the `Arc` can send without touching the socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};

use courier_shared::codec::{self, FrameKind};
use courier_shared::payloads::{WireAction, WireResult};
use courier_shared::types::{DeviceType, DisconnectReason};

use crate::outbound::{self, OutboundMessage};

/// Identity assigned once the handshake validates.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_type: DeviceType,
}

/// Instruction for the connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Frame(String),
    Close,
}

pub struct Device {
    address: String,
    identity: Mutex<Option<DeviceIdentity>>,
    running: AtomicBool,
    attempted_verification: AtomicBool,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    shutdown: Notify,
}

impl Device {
    /// Create a device for a freshly accepted connection, returning the
    /// receiving end of its outbound queue for the writer task.
    pub fn new(address: String) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let device = Arc::new(Self {
            address,
            identity: Mutex::new(None),
            running: AtomicBool::new(false),
            attempted_verification: AtomicBool::new(false),
            outbound_tx,
            shutdown: Notify::new(),
        });
        (device, outbound_rx)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn device_id(&self) -> Option<String> {
        self.identity
            .lock()
            .expect("identity lock poisoned")
            .as_ref()
            .map(|id| id.device_id.clone())
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        self.identity
            .lock()
            .expect("identity lock poisoned")
            .as_ref()
            .map(|id| id.device_type)
    }

    /// Assign the identity learned during the handshake. Only the first
    /// assignment sticks.
    pub fn assign_identity(&self, device_id: String, device_type: DeviceType) {
        let mut identity = self.identity.lock().expect("identity lock poisoned");
        if identity.is_some() {
            tracing::warn!(address = %self.address, "ignoring repeated identity assignment");
            return;
        }
        *identity = Some(DeviceIdentity {
            device_id,
            device_type,
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    pub fn mark_attempted_verification(&self) {
        self.attempted_verification.store(true, Ordering::SeqCst);
    }

    pub fn has_attempted_verification(&self) -> bool {
        self.attempted_verification.load(Ordering::SeqCst)
    }

    /// Wait until the device is told to shut down.
    pub async fn shutdown_signalled(&self) {
        self.shutdown.notified().await;
    }

    // -- outbound ---------------------------------------------------------

    /// Queue a raw frame line for the writer task. Returns false once the
    /// writer is gone.
    pub fn queue_frame(&self, line: String) -> bool {
        self.outbound_tx.send(Outbound::Frame(line)).is_ok()
    }

    /// Encrypt and send a newly arrived message on a worker, so a slow
    /// attachment read never stalls the caller.
    pub fn send_new_message(self: &Arc<Self>, message: Arc<OutboundMessage>) {
        self.send_message_frame(FrameKind::NewMessage, message);
    }

    /// Send an updated sighting of an already-known message.
    pub fn send_message_updated(self: &Arc<Self>, message: Arc<OutboundMessage>) {
        self.send_message_frame(FrameKind::MessageUpdated, message);
    }

    fn send_message_frame(self: &Arc<Self>, kind: FrameKind, message: Arc<OutboundMessage>) {
        let device = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let wire = match outbound::to_wire_message(&message) {
                Ok(wire) => wire,
                Err(error) => {
                    tracing::warn!(
                        guid = %message.message.guid,
                        %error,
                        "failed to prepare outbound message"
                    );
                    return;
                }
            };
            match codec::encode_frame(kind, &wire) {
                Ok(line) => {
                    device.queue_frame(line);
                }
                Err(error) => {
                    tracing::warn!(guid = %message.message.guid, %error, "failed to encode frame");
                }
            }
        });
    }

    pub fn send_action(&self, action: &WireAction) {
        match codec::encode_frame(FrameKind::Action, action) {
            Ok(line) => {
                self.queue_frame(line);
            }
            Err(error) => tracing::warn!(%error, "failed to encode action frame"),
        }
    }

    /// Answer a client frame with its result codes, correlated by the
    /// uuid of the frame that triggered the work.
    pub fn send_result(&self, correlation_uuid: &str, codes: Vec<i32>) {
        let result = WireResult {
            correlation_uuid: correlation_uuid.to_string(),
            result: codes,
        };
        match codec::encode_frame(FrameKind::Result, &result) {
            Ok(line) => {
                self.queue_frame(line);
            }
            Err(error) => tracing::warn!(%error, "failed to encode result frame"),
        }
    }

    // -- teardown ---------------------------------------------------------

    /// Stop the device, telling the client why before the socket closes.
    /// Safe to call more than once; only the first call acts.
    pub fn kill(&self, reason: DisconnectReason) {
        if self.begin_shutdown() {
            return;
        }
        tracing::info!(address = %self.address, ?reason, "disconnecting device");
        match codec::encode_frame(FrameKind::ConnectionTerminated, &reason.code()) {
            Ok(line) => {
                self.queue_frame(line);
            }
            Err(error) => tracing::warn!(%error, "failed to encode termination frame"),
        }
        self.finish_shutdown();
    }

    /// Stop the device without a termination frame. Used when the client
    /// announced the disconnect itself and is no longer listening.
    pub fn kill_silent(&self) {
        if self.begin_shutdown() {
            return;
        }
        tracing::info!(address = %self.address, "device disconnected by client");
        self.finish_shutdown();
    }

    /// Returns true when a shutdown already happened.
    fn begin_shutdown(&self) -> bool {
        !self.running.swap(false, Ordering::SeqCst)
    }

    fn finish_shutdown(&self) {
        let _ = self.outbound_tx.send(Outbound::Close);
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_assigned_once() {
        let (device, _rx) = Device::new("10.0.0.1".to_string());
        device.assign_identity("dev-1".to_string(), DeviceType::Android);
        device.assign_identity("dev-2".to_string(), DeviceType::Ios);

        assert_eq!(device.device_id().as_deref(), Some("dev-1"));
        assert_eq!(device.device_type(), Some(DeviceType::Android));
    }

    #[test]
    fn test_kill_sends_reason_then_close() {
        let (device, mut rx) = Device::new("10.0.0.1".to_string());
        device.start();
        device.kill(DisconnectReason::InvalidLogin);

        match rx.try_recv().unwrap() {
            Outbound::Frame(line) => {
                assert!(line.starts_with("connection-terminated:"));
                assert!(line.contains("\"payload\":\"5\""));
            }
            other => panic!("expected frame, got {other:?}"),
        }
        assert!(matches!(rx.try_recv().unwrap(), Outbound::Close));
        assert!(!device.is_running());
    }

    #[test]
    fn test_kill_is_idempotent() {
        let (device, mut rx) = Device::new("10.0.0.1".to_string());
        device.start();
        device.kill(DisconnectReason::Error);
        device.kill(DisconnectReason::ServerClosed);

        let mut frames = 0;
        while let Ok(item) = rx.try_recv() {
            if matches!(item, Outbound::Frame(_)) {
                frames += 1;
            }
        }
        assert_eq!(frames, 1);
    }

    #[test]
    fn test_silent_kill_sends_no_frame() {
        let (device, mut rx) = Device::new("10.0.0.1".to_string());
        device.start();
        device.kill_silent();

        assert!(matches!(rx.try_recv().unwrap(), Outbound::Close));
        assert!(rx.try_recv().is_err());
    }
}
