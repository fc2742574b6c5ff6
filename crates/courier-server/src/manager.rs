//! The live-connection registry.
//!
//! One lock guards the whole map, so the duplicate-address check and the
//! insert that follows it are a single atomic step. Broadcasts snapshot
//! the registry and fan out per device; one device's failure never
//! touches another's.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use courier_shared::types::DisconnectReason;

use crate::device::Device;
use crate::outbound::OutboundMessage;

#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("another running device is already connected from this address")]
    AlreadyConnected,

    #[error("device has no identity")]
    MissingIdentity,
}

#[derive(Default)]
pub struct DeviceManager {
    devices: Mutex<HashMap<String, Arc<Device>>>,
}

impl DeviceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handshake-complete device, enforcing address uniqueness
    /// in the same critical section as the insert.
    pub fn register(&self, device: &Arc<Device>) -> Result<(), RegisterError> {
        let device_id = device.device_id().ok_or(RegisterError::MissingIdentity)?;

        let mut devices = self.devices.lock().expect("registry lock poisoned");
        let duplicate = devices
            .values()
            .any(|other| other.address() == device.address() && other.is_running());
        if duplicate {
            return Err(RegisterError::AlreadyConnected);
        }

        tracing::info!(
            address = %device.address(),
            device_id = %device_id,
            "device registered"
        );
        devices.insert(device_id, Arc::clone(device));
        Ok(())
    }

    /// Remove a device from the registry and stop it. A client-announced
    /// disconnect skips the termination frame; every other reason sends
    /// one.
    pub fn remove(&self, device: &Arc<Device>, reason: DisconnectReason, note: Option<&str>) {
        if let Some(device_id) = device.device_id() {
            self.devices
                .lock()
                .expect("registry lock poisoned")
                .remove(&device_id);
        }
        if let Some(note) = note {
            tracing::warn!(address = %device.address(), ?reason, note, "removing device");
        }
        match reason {
            DisconnectReason::ClientDisconnected => device.kill_silent(),
            other => device.kill(other),
        }
    }

    pub fn device_count(&self) -> usize {
        self.devices.lock().expect("registry lock poisoned").len()
    }

    fn snapshot(&self) -> Vec<Arc<Device>> {
        self.devices
            .lock()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Fan a newly arrived message out to every connected device.
    pub fn broadcast_new_message(&self, message: &Arc<OutboundMessage>) {
        for device in self.snapshot() {
            device.send_new_message(Arc::clone(message));
        }
    }

    /// Fan an updated message sighting out to every connected device.
    pub fn broadcast_message_updated(&self, message: &Arc<OutboundMessage>) {
        for device in self.snapshot() {
            device.send_message_updated(Arc::clone(message));
        }
    }

    /// Disconnect every device with one reason. Used at shutdown.
    pub fn kill_all(&self, reason: DisconnectReason) {
        let devices: Vec<Arc<Device>> = {
            let mut map = self.devices.lock().expect("registry lock poisoned");
            map.drain().map(|(_, device)| device).collect()
        };
        for device in devices {
            device.kill(reason);
        }
    }
}
