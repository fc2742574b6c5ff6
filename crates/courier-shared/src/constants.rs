/// AES key size in bytes (AES-128)
pub const AES_KEY_SIZE: usize = 16;

/// HMAC-SHA256 key size in bytes
pub const HMAC_KEY_SIZE: usize = 32;

/// HMAC-SHA256 output size in bytes
pub const MAC_SIZE: usize = 32;

/// CBC initialization vector size in bytes
pub const IV_SIZE: usize = 16;

/// PBKDF2 iteration count for password-derived keys
pub const PBKDF2_ITERATIONS: u32 = 10_000;

/// PBKDF2 salt size in bytes (same size as the AES key output)
pub const SALT_SIZE: usize = AES_KEY_SIZE;

/// Buffer size for streaming file encryption/decryption
pub const FILE_CRYPTO_BUFFER_SIZE: usize = 1024;

/// Safety margin kept free when the memory guard is enabled (bytes)
pub const MEMORY_GUARD_MARGIN: u64 = 10 * 1024 * 1024;

/// Default TCP listen port for the relay server
pub const DEFAULT_RELAY_PORT: u16 = 8755;

/// Bounded size of an archive snapshot used for change detection
pub const MESSAGE_COUNT_LIMIT: usize = 250;
