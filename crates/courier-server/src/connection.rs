//! Connection lifecycle: handshake, receive loop, teardown.
//!
//! One task drives each accepted socket. The read half stays with the
//! driver; the write half belongs to a writer task draining the device's
//! outbound queue. The handshake challenges the client with the shared
//! secret and validates, in order, build version, email, password,
//! device type, and address uniqueness. After that the driver processes
//! frames strictly in arrival order.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use courier_shared::codec::{self, FrameKind};
use courier_shared::crypto::{self, SecretKeys};
use courier_shared::payloads::{EncryptedText, InitConnect, VerifyChallenge, WireAction, WireMessage};
use courier_shared::types::{DeviceType, DisconnectReason, ReturnType};
use courier_store::MessageStore;

use crate::automation::ScriptExecutor;
use crate::config::ServerConfig;
use crate::device::{Device, Outbound};
use crate::manager::{DeviceManager, RegisterError};
use crate::relay;

/// Shared dependencies handed to every connection task.
#[derive(Clone)]
pub struct ConnectionContext {
    pub config: Arc<ServerConfig>,
    pub manager: Arc<DeviceManager>,
    pub store: Arc<Mutex<MessageStore>>,
    pub executor: Arc<dyn ScriptExecutor>,
}

/// Drive one accepted connection to completion.
pub async fn drive_connection(ctx: ConnectionContext, stream: TcpStream) {
    let address = match stream.peer_addr() {
        Ok(addr) => addr.ip().to_string(),
        Err(error) => {
            tracing::warn!(%error, "dropping connection without a peer address");
            return;
        }
    };

    let (read_half, write_half) = stream.into_split();
    let (device, outbound_rx) = Device::new(address);
    tokio::spawn(write_loop(write_half, outbound_rx));
    device.start();

    let mut reader = BufReader::new(read_half);
    if handshake(&ctx, &device, &mut reader).await {
        receive_loop(&ctx, &device, &mut reader).await;
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Frame(mut line) => {
                line.push('\n');
                if let Err(error) = writer.write_all(line.as_bytes()).await {
                    tracing::debug!(%error, "write failed, stopping writer");
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
            Outbound::Close => {
                let _ = writer.shutdown().await;
                break;
            }
        }
    }
}

enum ReadEvent {
    Line(String),
    Eof,
    Shutdown,
    Failed(std::io::Error),
}

/// Read the next frame line, racing against the device's shutdown signal
/// so a kill never leaves the reader blocked.
async fn next_frame(device: &Device, reader: &mut BufReader<OwnedReadHalf>) -> ReadEvent {
    let mut line = String::new();
    tokio::select! {
        result = reader.read_line(&mut line) => match result {
            Ok(0) => ReadEvent::Eof,
            Ok(_) => ReadEvent::Line(line.trim_end().to_string()),
            Err(error) => ReadEvent::Failed(error),
        },
        _ = device.shutdown_signalled() => ReadEvent::Shutdown,
    }
}

/// Challenge the client and validate its `init-connect` reply. Returns
/// true when the device registered and may enter the receive loop.
///
/// A frame the server cannot read costs the client its attempt but not
/// the connection: the loop issues a fresh challenge until credentials
/// were actually checked.
async fn handshake(
    ctx: &ConnectionContext,
    device: &Arc<Device>,
    reader: &mut BufReader<OwnedReadHalf>,
) -> bool {
    while device.is_running() && !device.has_attempted_verification() {
        if !send_challenge(ctx, device) {
            return false;
        }

        let line = match next_frame(device, reader).await {
            ReadEvent::Line(line) => line,
            ReadEvent::Eof => {
                device.kill_silent();
                return false;
            }
            ReadEvent::Shutdown => return false,
            ReadEvent::Failed(error) => {
                tracing::warn!(address = %device.address(), %error, "handshake read failed");
                device.kill(DisconnectReason::Error);
                return false;
            }
        };

        let init: InitConnect = match codec::decode_frame(FrameKind::InitConnect, &line) {
            Ok((_, init)) => init,
            Err(error) => {
                tracing::warn!(
                    address = %device.address(),
                    %error,
                    "unusable handshake frame, challenging again"
                );
                continue;
            }
        };

        return verify_and_register(ctx, device, init);
    }
    false
}

/// Send a `verify-password-secret` frame carrying the shared secret
/// under freshly generated keys.
fn send_challenge(ctx: &ConnectionContext, device: &Arc<Device>) -> bool {
    let challenge_keys = match crypto::generate_keys() {
        Ok(keys) => keys,
        Err(error) => {
            tracing::error!(%error, "cannot generate challenge keys");
            device.kill(DisconnectReason::Error);
            return false;
        }
    };
    let encrypted_secret = match crypto::encrypt_string(&ctx.config.secret, &challenge_keys) {
        Ok(encrypted) => encrypted,
        Err(error) => {
            tracing::error!(%error, "cannot encrypt handshake secret");
            device.kill(DisconnectReason::Error);
            return false;
        }
    };
    let challenge = VerifyChallenge {
        encrypted_secret,
        keys: challenge_keys.to_string(),
    };
    match codec::encode_frame(FrameKind::VerifyPasswordSecret, &challenge) {
        Ok(line) => {
            device.queue_frame(line);
            true
        }
        Err(error) => {
            tracing::error!(%error, "cannot encode handshake challenge");
            device.kill(DisconnectReason::Error);
            false
        }
    }
}

/// Validate decrypted credentials and register the device.
fn verify_and_register(ctx: &ConnectionContext, device: &Arc<Device>, init: InitConnect) -> bool {
    let (email, password) = match (
        decrypt_credential(&init.email),
        decrypt_credential(&init.password),
    ) {
        (Ok(email), Ok(password)) => (email, password),
        (Err(error), _) | (_, Err(error)) => {
            tracing::warn!(address = %device.address(), %error, "cannot decrypt credentials");
            device.kill(DisconnectReason::Error);
            return false;
        }
    };

    if init.build_version != ctx.config.build_version {
        tracing::info!(
            address = %device.address(),
            client = init.build_version,
            server = ctx.config.build_version,
            "build version mismatch"
        );
        device.kill(DisconnectReason::IncorrectVersion);
        return false;
    }

    if email != ctx.config.account_email {
        device.mark_attempted_verification();
        tracing::info!(address = %device.address(), "login rejected: unknown account");
        device.kill(DisconnectReason::InvalidLogin);
        return false;
    }

    if !crypto::constant_time_eq(
        password.as_bytes(),
        ctx.config.account_password.as_bytes(),
    ) {
        device.mark_attempted_verification();
        tracing::info!(address = %device.address(), "login rejected: wrong password");
        device.kill(DisconnectReason::InvalidLogin);
        return false;
    }
    device.mark_attempted_verification();

    let device_type = DeviceType::from_tag(&init.device_type);
    if device_type == DeviceType::Unsupported {
        tracing::warn!(
            address = %device.address(),
            tag = %init.device_type,
            "unsupported device type"
        );
        device.kill(DisconnectReason::Error);
        return false;
    }
    device.assign_identity(init.device_id, device_type);

    match ctx.manager.register(device) {
        Ok(()) => true,
        Err(RegisterError::AlreadyConnected) => {
            device.kill(DisconnectReason::AlreadyConnected);
            false
        }
        Err(error) => {
            tracing::error!(address = %device.address(), %error, "registration failed");
            device.kill(DisconnectReason::Error);
            false
        }
    }
}

fn decrypt_credential(field: &EncryptedText) -> Result<String, courier_shared::CryptoError> {
    let keys: SecretKeys = field.key.parse()?;
    crypto::decrypt_string(&field.encrypted_text, &keys)
}

async fn receive_loop(
    ctx: &ConnectionContext,
    device: &Arc<Device>,
    reader: &mut BufReader<OwnedReadHalf>,
) {
    while device.is_running() {
        match next_frame(device, reader).await {
            ReadEvent::Line(line) => {
                if line.is_empty() {
                    continue;
                }
                if handle_frame(ctx, device, &line).await.is_break() {
                    break;
                }
            }
            ReadEvent::Eof => {
                ctx.manager
                    .remove(device, DisconnectReason::ClientDisconnected, None);
                break;
            }
            ReadEvent::Shutdown => break,
            ReadEvent::Failed(error) => {
                if device.is_running() {
                    tracing::error!(address = %device.address(), %error, "read failed");
                    ctx.manager.remove(
                        device,
                        DisconnectReason::Error,
                        Some("read failure, disconnecting before it repeats"),
                    );
                }
                break;
            }
        }
    }
}

/// Process one frame. Frames the server does not understand are dropped;
/// a malformed envelope or payload only costs that frame.
///
/// Relay and action bodies block on sqlite, the filesystem, and script
/// subprocesses, so they run on the blocking pool; awaiting the handle
/// keeps per-connection frames strictly ordered.
async fn handle_frame(ctx: &ConnectionContext, device: &Arc<Device>, line: &str) -> ControlFlow<()> {
    let Some((kind, rest)) = codec::classify(line) else {
        tracing::debug!(address = %device.address(), "ignoring frame with unknown prefix");
        return ControlFlow::Continue(());
    };

    match kind {
        FrameKind::ConnectionTerminated => {
            ctx.manager
                .remove(device, DisconnectReason::ClientDisconnected, None);
            ControlFlow::Break(())
        }
        FrameKind::NewMessage => {
            let (envelope, message): (_, WireMessage) = match decode(rest) {
                Some(decoded) => decoded,
                None => return ControlFlow::Continue(()),
            };

            let task_ctx = ctx.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                relay::relay_incoming_message(
                    &task_ctx.store,
                    task_ctx.executor.as_ref(),
                    &task_ctx.config.temp_dir,
                    &message,
                )
            })
            .await;
            match outcome {
                Ok(result) => respond(device, &envelope.message_uuid, result),
                Err(error) => {
                    tracing::error!(%error, "relay task failed");
                    device.send_result(&envelope.message_uuid, vec![ReturnType::UiError.code()]);
                }
            }
            ControlFlow::Continue(())
        }
        FrameKind::Action => {
            let (envelope, action): (_, WireAction) = match decode(rest) {
                Some(decoded) => decoded,
                None => return ControlFlow::Continue(()),
            };

            let executor = Arc::clone(&ctx.executor);
            let outcome = tokio::task::spawn_blocking(move || {
                relay::perform_incoming_action(executor.as_ref(), &action)
            })
            .await;
            match outcome {
                Ok(result) => respond(device, &envelope.message_uuid, result),
                Err(error) => {
                    tracing::error!(%error, "action task failed");
                    device.send_result(&envelope.message_uuid, vec![ReturnType::UiError.code()]);
                }
            }
            ControlFlow::Continue(())
        }
        // server-to-client kinds arriving here are a confused client
        other => {
            tracing::debug!(address = %device.address(), kind = ?other, "ignoring misdirected frame");
            ControlFlow::Continue(())
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(rest: &str) -> Option<(codec::Envelope, T)> {
    let envelope = match codec::decode_envelope(rest) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::warn!(%error, "dropping frame with malformed envelope");
            return None;
        }
    };
    match codec::decode_payload(&envelope) {
        Ok(payload) => Some((envelope, payload)),
        Err(error) => {
            tracing::warn!(%error, "dropping frame with malformed payload");
            None
        }
    }
}

fn respond(device: &Arc<Device>, correlation_uuid: &str, outcome: crate::error::Result<Vec<i32>>) {
    match outcome {
        Ok(codes) => device.send_result(correlation_uuid, codes),
        Err(error) => {
            tracing::error!(%error, "relay failed");
            device.send_result(correlation_uuid, vec![ReturnType::UiError.code()]);
        }
    }
}
