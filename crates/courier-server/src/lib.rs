//! # courier-server
//!
//! Relay server bridging a desktop message archive to remote mobile
//! clients over persistent TCP connections.
//!
//! This crate provides:
//! - **Device** connection state machine: handshake, framed exchange,
//!   end-to-end encryption, graceful and forced teardown
//! - **DeviceManager**: the live-connection registry with atomic
//!   address-uniqueness enforcement and broadcast fan-out
//! - **Change-detection loop**: a polling diff engine over archive
//!   snapshots driving relay, push, and broadcast side effects
//! - **Relay/action execution**: translating decrypted client payloads
//!   into desktop-automation calls and collecting their result codes

pub mod automation;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod manager;
pub mod outbound;
pub mod push;
pub mod relay;
pub mod server;
pub mod watcher;

pub use config::ServerConfig;
pub use connection::ConnectionContext;
pub use device::Device;
pub use error::ServerError;
pub use manager::DeviceManager;
pub use watcher::{ChangeDetector, WatchOutcome};
