//! Incoming-message relay and action execution.
//!
//! A `new-message` frame is decrypted, its attachments staged to disk,
//! the target chat resolved against the archive, and the send broken
//! into automation calls. The attachment-count policy is uniform across
//! peer and group sends: zero attachments is one text-only call, one
//! attachment is one combined call, several attachments are one
//! attachment-only call each followed by a final text-only call. Result
//! codes are collected in call order.
//!
//! The archive lock is held only while the target is resolved; by the
//! time a script runs, other devices and the change detector can take
//! the store again.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use courier_shared::crypto::{self, CipherBytesIvMac, SecretKeys};
use courier_shared::payloads::{WireAction, WireMessage};
use courier_shared::types::{ActionType, ReturnType};
use courier_store::{Chat, MessageStore};

use crate::automation::ScriptExecutor;
use crate::error::{Result, ServerError};

/// A resolved send target, built under the store lock and executed
/// after it is released.
enum SendPlan {
    Peer { recipient: String },
    Group { base_args: Vec<String> },
    NewGroupRejected,
}

/// Relay one decrypted client message into automation calls, returning
/// the ordered result codes.
pub fn relay_incoming_message(
    store: &Mutex<MessageStore>,
    executor: &dyn ScriptExecutor,
    temp_dir: &Path,
    message: &WireMessage,
) -> Result<Vec<i32>> {
    let text_keys: SecretKeys = message.encrypted_text.key.parse()?;
    let text = crypto::decrypt_string(&message.encrypted_text.encrypted_text, &text_keys)?;
    let attachment_paths = stage_attachments(temp_dir, message)?;

    // resolve the target with the lock, run the scripts without it
    let plan = {
        let store = store.lock().expect("store lock poisoned");
        plan_send(&store, message)?
    };

    match plan {
        // a group cannot be originated from the client side; signal the
        // specific failure pair without touching the automation layer
        SendPlan::NewGroupRejected => Ok(vec![
            ReturnType::NullMessage.code(),
            ReturnType::GroupChatNotFound.code(),
        ]),
        SendPlan::Peer { recipient } => run_send_sequence(
            executor,
            ActionType::SendMessage,
            &[recipient],
            &attachment_paths,
            &text,
        ),
        SendPlan::Group { base_args } => run_send_sequence(
            executor,
            ActionType::SendGroupMessage,
            &base_args,
            &attachment_paths,
            &text,
        ),
    }
}

fn plan_send(store: &MessageStore, message: &WireMessage) -> Result<SendPlan> {
    match store.chat_by_guid(&message.chat.guid)? {
        Some(Chat::Peer { peer_handle, .. }) => Ok(SendPlan::Peer {
            recipient: peer_handle,
        }),
        Some(chat @ Chat::Group { .. }) => Ok(SendPlan::Group {
            base_args: group_target_args(store, &chat)?,
        }),
        None if message.chat.participants.len() >= 2 => Ok(SendPlan::NewGroupRejected),
        // unknown chat with a single declared participant starts a new
        // one-to-one conversation
        None => Ok(SendPlan::Peer {
            recipient: message
                .chat
                .participants
                .first()
                .cloned()
                .unwrap_or_else(|| message.handle.clone()),
        }),
    }
}

/// Run one client action through the automation layer.
pub fn perform_incoming_action(
    executor: &dyn ScriptExecutor,
    action: &WireAction,
) -> Result<Vec<i32>> {
    let action_type = ActionType::from_code(action.action_type)
        .ok_or(ServerError::UnknownAction(action.action_type))?;
    Ok(executor.run_script(action_type, &action.args)?.into_codes())
}

/// Decrypt every attachment body and stage it under
/// `temp_dir/<message guid>/<transfer name>`.
fn stage_attachments(temp_dir: &Path, message: &WireMessage) -> Result<Vec<String>> {
    if message.attachments.is_empty() {
        return Ok(Vec::new());
    }

    let dir = temp_dir.join(&message.guid);
    std::fs::create_dir_all(&dir)?;

    let mut paths = Vec::with_capacity(message.attachments.len());
    for attachment in &message.attachments {
        let keys: SecretKeys = attachment.file_data.key.parse()?;
        let bundle = CipherBytesIvMac::from_parts(
            attachment.file_data.encrypted_data.clone(),
            &attachment.file_data.iv_mac,
        )?;
        let bytes = crypto::decrypt_bytes(&bundle, &keys)?;

        let path = dir.join(&attachment.transfer_name);
        std::fs::write(&path, bytes)?;
        paths.push(path.to_string_lossy().into_owned());
    }
    Ok(paths)
}

fn run_send_sequence(
    executor: &dyn ScriptExecutor,
    action: ActionType,
    base_args: &[String],
    attachments: &[String],
    text: &str,
) -> Result<Vec<i32>> {
    let call = |attachment: &str, text: &str| -> Result<Vec<i32>> {
        let mut args = base_args.to_vec();
        args.push(attachment.to_string());
        args.push(text.to_string());
        Ok(executor.run_script(action, &args)?.into_codes())
    };

    match attachments {
        [] => call("", text),
        [only] => call(only, text),
        many => {
            let mut codes = Vec::new();
            for attachment in many {
                codes.extend(call(attachment, "")?);
            }
            codes.extend(call("", text)?);
            Ok(codes)
        }
    }
}

/// Base arguments identifying a group target: a name (display name or
/// joined handle list), plus the last message's send-time and text as
/// disambiguation context for groups without a stable name.
fn group_target_args(store: &MessageStore, chat: &Chat) -> Result<Vec<String>> {
    let (display_name, participants) = match chat {
        Chat::Group {
            display_name,
            participants,
            ..
        } => (display_name, participants),
        Chat::Peer { peer_handle, .. } => return Ok(vec![peer_handle.clone()]),
    };

    let name = display_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| joined_handle_name(participants));

    let (time_arg, last_text) = match store.last_message_from_chat(chat)? {
        Some(last) => (
            last.date_sent
                .map(|sent| format_group_time(sent, Utc::now()))
                .unwrap_or_default(),
            last.text.unwrap_or_default(),
        ),
        None => (String::new(), String::new()),
    };

    Ok(vec![name, time_arg, last_text])
}

/// "a, b & c" style fallback name for unnamed groups.
fn joined_handle_name(participants: &[String]) -> String {
    match participants {
        [] => String::new(),
        [only] => only.clone(),
        [rest @ .., last] => format!("{} & {}", rest.join(", "), last),
    }
}

/// Format a timestamp the way the desktop client labels conversations:
/// clock time for today, "Yesterday", short date otherwise.
fn format_group_time(sent: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let sent_date = sent.date_naive();
    let today = now.date_naive();

    if sent_date == today {
        sent.format("%-I:%M %p").to_string()
    } else if today.pred_opt() == Some(sent_date) {
        "Yesterday".to_string()
    } else {
        sent.format("%-m/%-d/%y").to_string()
    }
}
