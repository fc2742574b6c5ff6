use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Secure randomness source unavailable")]
    RandomSource,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("MAC mismatch: ciphertext failed integrity check")]
    IntegrityCheckFailed,

    #[error("Malformed ciphertext or padding")]
    Malformed,

    #[error("Cannot parse {expected}, got {found} segments")]
    BadSerializedForm { expected: &'static str, found: usize },

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame prefix does not match any known kind")]
    UnknownPrefix,

    #[error("Frame payload parse error: {0}")]
    Parse(#[from] serde_json::Error),
}
