//! Server-owned relay ledger.
//!
//! Separate sqlite database (never the archive) holding the
//! outbound/inbound tracking records written by the change-detection loop
//! and the push-token registry used for notification routing. The schema
//! is created on open.

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

/// Handle on the relay's own bookkeeping database.
pub struct RelayLedger {
    conn: Connection,
}

impl RelayLedger {
    /// Open (or create) the ledger at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening relay ledger");
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory ledger (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::ensure_schema(&conn)?;
        Ok(Self { conn })
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tracked_messages (
                guid       TEXT PRIMARY KEY,
                from_me    INTEGER NOT NULL,
                tracked_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS push_tokens (
                token         TEXT PRIMARY KEY,
                device_id     TEXT NOT NULL,
                account_email TEXT NOT NULL,
                registered_at TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    // -- message tracking -------------------------------------------------

    /// Record a message sighting in the outbound/inbound tracking table.
    /// Re-recording an already-tracked GUID is a no-op.
    pub fn record_message(&self, guid: &str, from_me: bool) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO tracked_messages (guid, from_me, tracked_at)
             VALUES (?1, ?2, ?3)",
            params![guid, from_me, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn is_recorded(&self, guid: &str) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT guid FROM tracked_messages WHERE guid = ?1",
                params![guid],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn recorded_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM tracked_messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // -- push-token registry ----------------------------------------------

    /// Register (or refresh) a push token for a device/account pair.
    pub fn register_token(&self, token: &str, device_id: &str, account_email: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO push_tokens (token, device_id, account_email, registered_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(token) DO UPDATE SET
                device_id = excluded.device_id,
                account_email = excluded.account_email,
                registered_at = excluded.registered_at",
            params![token, device_id, account_email, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn unregister_token(&self, token: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM push_tokens WHERE token = ?1", params![token])?;
        Ok(affected > 0)
    }

    pub fn all_tokens(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT token FROM push_tokens ORDER BY registered_at")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut tokens = Vec::new();
        for row in rows {
            tokens.push(row?);
        }
        Ok(tokens)
    }

    pub fn email_for_token(&self, token: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT account_email FROM push_tokens WHERE token = ?1",
                params![token],
                |row| row.get(0),
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_message_idempotent() {
        let ledger = RelayLedger::open_in_memory().unwrap();

        assert!(!ledger.is_recorded("m1").unwrap());
        ledger.record_message("m1", true).unwrap();
        ledger.record_message("m1", true).unwrap();

        assert!(ledger.is_recorded("m1").unwrap());
        assert_eq!(ledger.recorded_count().unwrap(), 1);
    }

    #[test]
    fn test_token_registry_roundtrip() {
        let ledger = RelayLedger::open_in_memory().unwrap();

        ledger
            .register_token("tok-1", "device-1", "me@example.com")
            .unwrap();
        ledger
            .register_token("tok-2", "device-2", "other@example.com")
            .unwrap();

        assert_eq!(ledger.all_tokens().unwrap().len(), 2);
        assert_eq!(
            ledger.email_for_token("tok-1").unwrap().as_deref(),
            Some("me@example.com")
        );
        assert_eq!(ledger.email_for_token("missing").unwrap(), None);

        assert!(ledger.unregister_token("tok-1").unwrap());
        assert!(!ledger.unregister_token("tok-1").unwrap());
        assert_eq!(ledger.all_tokens().unwrap().len(), 1);
    }

    #[test]
    fn test_register_token_refreshes_account() {
        let ledger = RelayLedger::open_in_memory().unwrap();

        ledger
            .register_token("tok-1", "device-1", "old@example.com")
            .unwrap();
        ledger
            .register_token("tok-1", "device-1", "new@example.com")
            .unwrap();

        assert_eq!(
            ledger.email_for_token("tok-1").unwrap().as_deref(),
            Some("new@example.com")
        );
        assert_eq!(ledger.all_tokens().unwrap().len(), 1);
    }

    #[test]
    fn test_ledger_opens_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RelayLedger::open(&dir.path().join("nested/ledger.db")).unwrap();
        ledger.record_message("m1", false).unwrap();
        assert!(ledger.is_recorded("m1").unwrap());
    }
}
