use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the ledger directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A row referenced a chat style the schema does not define.
    #[error("Unknown chat style: {0}")]
    UnknownChatStyle(i64),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
