//! Server-side error types.

use courier_shared::{CodecError, CryptoError};
use courier_store::StoreError;

use crate::automation::AutomationError;

/// Errors raised while serving connections and relaying messages.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Automation error: {0}")]
    Automation(#[from] AutomationError),

    #[error("Unknown action code: {0}")]
    UnknownAction(i32),

    #[error("Config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
