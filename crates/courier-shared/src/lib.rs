//! # courier-shared
//!
//! Wire-level primitives shared between the courier relay server and its
//! remote clients:
//!
//! - `crypto` - password-based and random AES-128-CBC keys with
//!   encrypt-then-MAC (HMAC-SHA256) authenticated encryption
//! - `codec` - the prefix + JSON envelope framing used on the TCP stream
//! - `payloads` - the typed payloads carried inside frames
//! - `types` - protocol enums (device types, disconnect reasons, result
//!   codes, action types) and their numeric wire codes

pub mod codec;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod payloads;
pub mod types;

pub use error::{CodecError, CryptoError};
