//! Desktop message archive access.
//!
//! The archive is an external sqlite database owned by the desktop
//! messaging client; the relay only ever reads it. [`MessageStore`] wraps
//! the connection and exposes the three queries the relay needs. The
//! connection can be re-opened between poll cycles via [`MessageStore::reload`]
//! because the owning client may rewrite the file underneath us.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::models::{Attachment, Chat, Message};

const MESSAGE_COLUMNS: &str =
    "guid, chat_guid, handle, text, date_sent, date_delivered, date_read, from_me, errored, finished";

/// Read-side handle on the desktop message archive.
pub struct MessageStore {
    conn: Connection,
    path: PathBuf,
}

impl MessageStore {
    /// Open the archive at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "opening message archive");
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Re-open the underlying connection.
    ///
    /// Called at the start of every change-detection cycle; failure here
    /// is fatal upstream because the archive is load-bearing.
    pub fn reload(&mut self) -> Result<()> {
        self.conn = Connection::open(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The `n` most recent messages, newest first, attachments included.
    pub fn messages_by_amount(&self, n: usize) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages ORDER BY rowid DESC LIMIT ?1"
        ))?;

        let rows = stmt.query_map(params![n as i64], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            message.attachments = self.attachments_for(&message.guid)?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Look up a chat by GUID. `None` when the archive has no such chat.
    pub fn chat_by_guid(&self, guid: &str) -> Result<Option<Chat>> {
        let row: Option<(String, i64, Option<String>)> = self
            .conn
            .query_row(
                "SELECT guid, style, display_name FROM chats WHERE guid = ?1",
                params![guid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((guid, style, display_name)) = row else {
            return Ok(None);
        };

        let participants = self.participants_for(&guid)?;

        match style {
            0 => Ok(Some(Chat::Peer {
                guid,
                peer_handle: participants.into_iter().next().unwrap_or_default(),
            })),
            1 => Ok(Some(Chat::Group {
                guid,
                display_name,
                participants,
            })),
            other => Err(StoreError::UnknownChatStyle(other)),
        }
    }

    /// The most recently sent message in a chat, if any.
    pub fn last_message_from_chat(&self, chat: &Chat) -> Result<Option<Message>> {
        let message: Option<Message> = self
            .conn
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages
                     WHERE chat_guid = ?1 ORDER BY rowid DESC LIMIT 1"
                ),
                params![chat.guid()],
                row_to_message,
            )
            .optional()?;

        match message {
            Some(mut message) => {
                message.attachments = self.attachments_for(&message.guid)?;
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    fn attachments_for(&self, message_guid: &str) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn.prepare(
            "SELECT guid, transfer_name, path FROM attachments
             WHERE message_guid = ?1 ORDER BY rowid",
        )?;

        let rows = stmt.query_map(params![message_guid], |row| {
            Ok(Attachment {
                guid: row.get(0)?,
                transfer_name: row.get(1)?,
                path: row.get(2)?,
            })
        })?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    fn participants_for(&self, chat_guid: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT handle FROM chat_participants WHERE chat_guid = ?1 ORDER BY rowid",
        )?;

        let rows = stmt.query_map(params![chat_guid], |row| row.get(0))?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        guid: row.get(0)?,
        chat_guid: row.get(1)?,
        handle: row.get(2)?,
        text: row.get(3)?,
        attachments: Vec::new(),
        date_sent: millis_to_datetime(row.get(4)?),
        date_delivered: millis_to_datetime(row.get(5)?),
        date_read: millis_to_datetime(row.get(6)?),
        from_me: row.get(7)?,
        errored: row.get(8)?,
        finished: row.get(9)?,
    })
}

fn millis_to_datetime(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

/// Create the archive schema.
///
/// The real archive is owned by the desktop client; this exists for tests
/// and local development fixtures.
pub fn create_archive_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chats (
            guid         TEXT PRIMARY KEY,
            style        INTEGER NOT NULL,
            display_name TEXT
        );
        CREATE TABLE IF NOT EXISTS chat_participants (
            chat_guid TEXT NOT NULL,
            handle    TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            guid           TEXT PRIMARY KEY,
            chat_guid      TEXT NOT NULL,
            handle         TEXT NOT NULL,
            text           TEXT,
            date_sent      INTEGER,
            date_delivered INTEGER,
            date_read      INTEGER,
            from_me        INTEGER NOT NULL DEFAULT 0,
            errored        INTEGER NOT NULL DEFAULT 0,
            finished       INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS attachments (
            guid          TEXT PRIMARY KEY,
            message_guid  TEXT NOT NULL,
            transfer_name TEXT NOT NULL,
            path          TEXT NOT NULL
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_store(dir: &tempfile::TempDir) -> MessageStore {
        let path = dir.path().join("archive.db");
        let conn = Connection::open(&path).unwrap();
        create_archive_schema(&conn).unwrap();
        drop(conn);
        MessageStore::open(&path).unwrap()
    }

    fn insert_message(store: &MessageStore, guid: &str, chat: &str, text: Option<&str>) {
        store
            .conn
            .execute(
                "INSERT INTO messages (guid, chat_guid, handle, text, date_sent)
                 VALUES (?1, ?2, 'alice@example.com', ?3, 1000)",
                params![guid, chat, text],
            )
            .unwrap();
    }

    #[test]
    fn test_messages_by_amount_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(&dir);

        insert_message(&store, "m1", "c1", Some("first"));
        insert_message(&store, "m2", "c1", Some("second"));
        insert_message(&store, "m3", "c1", Some("third"));

        let messages = store.messages_by_amount(2).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].guid, "m3");
        assert_eq!(messages[1].guid, "m2");
    }

    #[test]
    fn test_chat_by_guid_peer_and_group() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(&dir);

        store
            .conn
            .execute_batch(
                "INSERT INTO chats (guid, style, display_name) VALUES ('p1', 0, NULL);
                 INSERT INTO chat_participants (chat_guid, handle) VALUES ('p1', 'bob@example.com');
                 INSERT INTO chats (guid, style, display_name) VALUES ('g1', 1, 'Friends');
                 INSERT INTO chat_participants (chat_guid, handle) VALUES ('g1', 'bob@example.com');
                 INSERT INTO chat_participants (chat_guid, handle) VALUES ('g1', 'carol@example.com');",
            )
            .unwrap();

        match store.chat_by_guid("p1").unwrap().unwrap() {
            Chat::Peer { peer_handle, .. } => assert_eq!(peer_handle, "bob@example.com"),
            other => panic!("expected peer chat, got {:?}", other),
        }

        match store.chat_by_guid("g1").unwrap().unwrap() {
            Chat::Group {
                display_name,
                participants,
                ..
            } => {
                assert_eq!(display_name.as_deref(), Some("Friends"));
                assert_eq!(participants.len(), 2);
            }
            other => panic!("expected group chat, got {:?}", other),
        }

        assert!(store.chat_by_guid("missing").unwrap().is_none());
    }

    #[test]
    fn test_last_message_from_chat() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(&dir);

        store
            .conn
            .execute_batch(
                "INSERT INTO chats (guid, style) VALUES ('c1', 0);
                 INSERT INTO chat_participants (chat_guid, handle) VALUES ('c1', 'bob@example.com');",
            )
            .unwrap();
        insert_message(&store, "m1", "c1", Some("older"));
        insert_message(&store, "m2", "c1", Some("newer"));
        insert_message(&store, "m3", "other", Some("elsewhere"));

        let chat = store.chat_by_guid("c1").unwrap().unwrap();
        let last = store.last_message_from_chat(&chat).unwrap().unwrap();
        assert_eq!(last.guid, "m2");
    }

    #[test]
    fn test_attachments_joined_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(&dir);

        insert_message(&store, "m1", "c1", None);
        store
            .conn
            .execute_batch(
                "INSERT INTO attachments (guid, message_guid, transfer_name, path)
                 VALUES ('a1', 'm1', 'one.png', '/tmp/one.png');
                 INSERT INTO attachments (guid, message_guid, transfer_name, path)
                 VALUES ('a2', 'm1', 'two.png', '/tmp/two.png');",
            )
            .unwrap();

        let messages = store.messages_by_amount(1).unwrap();
        let names: Vec<_> = messages[0]
            .attachments
            .iter()
            .map(|a| a.transfer_name.as_str())
            .collect();
        assert_eq!(names, vec!["one.png", "two.png"]);
    }

    #[test]
    fn test_reload_reopens_connection() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = fixture_store(&dir);

        insert_message(&store, "m1", "c1", Some("hello"));
        store.reload().unwrap();
        assert_eq!(store.messages_by_amount(10).unwrap().len(), 1);
    }
}
