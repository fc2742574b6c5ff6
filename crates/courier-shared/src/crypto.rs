//! AES-128-CBC authenticated encryption with encrypt-then-MAC.
//!
//! Every payload is encrypted under a fresh random 16-byte IV, then an
//! HMAC-SHA256 tag is computed over `iv || ciphertext` with a separate
//! integrity key. Decryption verifies the tag in constant time before the
//! cipher is ever touched.
//!
//! Keys come in pairs ([`SecretKeys`]): a 128-bit AES confidentiality key
//! and a 256-bit HMAC integrity key, either freshly random or derived from
//! a password with PBKDF2-HMAC-SHA1.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use aes::Aes128;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::constants::{
    AES_KEY_SIZE, FILE_CRYPTO_BUFFER_SIZE, HMAC_KEY_SIZE, IV_SIZE, MAC_SIZE,
    MEMORY_GUARD_MARGIN, PBKDF2_ITERATIONS, SALT_SIZE,
};
use crate::error::CryptoError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Paired AES confidentiality key and HMAC integrity key.
///
/// Serialized as `base64(aes):base64(hmac)`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKeys {
    aes: [u8; AES_KEY_SIZE],
    mac: [u8; HMAC_KEY_SIZE],
}

impl SecretKeys {
    pub fn new(aes: [u8; AES_KEY_SIZE], mac: [u8; HMAC_KEY_SIZE]) -> Self {
        Self { aes, mac }
    }

    pub fn aes_key(&self) -> &[u8; AES_KEY_SIZE] {
        &self.aes
    }

    pub fn mac_key(&self) -> &[u8; HMAC_KEY_SIZE] {
        &self.mac
    }
}

impl fmt::Display for SecretKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", BASE64.encode(self.aes), BASE64.encode(self.mac))
    }
}

impl fmt::Debug for SecretKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        write!(f, "SecretKeys(..)")
    }
}

impl FromStr for SecretKeys {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 {
            return Err(CryptoError::BadSerializedForm {
                expected: "aesKey:hmacKey",
                found: parts.len(),
            });
        }

        let aes_bytes = BASE64.decode(parts[0])?;
        let mac_bytes = BASE64.decode(parts[1])?;

        let aes: [u8; AES_KEY_SIZE] = aes_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("AES key is not {AES_KEY_SIZE} bytes")))?;
        let mac: [u8; HMAC_KEY_SIZE] = mac_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("HMAC key is not {HMAC_KEY_SIZE} bytes")))?;

        Ok(Self { aes, mac })
    }
}

/// Generate fresh random AES and HMAC keys.
pub fn generate_keys() -> Result<SecretKeys, CryptoError> {
    let mut aes = [0u8; AES_KEY_SIZE];
    let mut mac = [0u8; HMAC_KEY_SIZE];
    OsRng
        .try_fill_bytes(&mut aes)
        .map_err(|_| CryptoError::RandomSource)?;
    OsRng
        .try_fill_bytes(&mut mac)
        .map_err(|_| CryptoError::RandomSource)?;
    Ok(SecretKeys { aes, mac })
}

/// Derive AES and HMAC keys from a password with PBKDF2-HMAC-SHA1.
///
/// Deterministic: the same password and salt always yield the same keys.
pub fn generate_key_from_password(password: &str, salt: &[u8]) -> SecretKeys {
    let mut derived = [0u8; AES_KEY_SIZE + HMAC_KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<sha1::Sha1>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut derived);

    let mut aes = [0u8; AES_KEY_SIZE];
    let mut mac = [0u8; HMAC_KEY_SIZE];
    aes.copy_from_slice(&derived[..AES_KEY_SIZE]);
    mac.copy_from_slice(&derived[AES_KEY_SIZE..]);
    SecretKeys { aes, mac }
}

/// Generate a random salt suitable for [`generate_key_from_password`].
pub fn generate_salt() -> Result<[u8; SALT_SIZE], CryptoError> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|_| CryptoError::RandomSource)?;
    Ok(salt)
}

pub fn salt_to_string(salt: &[u8]) -> String {
    BASE64.encode(salt)
}

pub fn salt_from_string(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(BASE64.decode(s)?)
}

/// Ciphertext bundled with its IV and MAC.
///
/// Serialized as `base64(iv):base64(mac):base64(ciphertext)`; the IV and
/// MAC go first because they are fixed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherTextIvMac {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub mac: [u8; MAC_SIZE],
}

impl fmt::Display for CipherTextIvMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            BASE64.encode(self.iv),
            BASE64.encode(self.mac),
            BASE64.encode(&self.ciphertext)
        )
    }
}

impl FromStr for CipherTextIvMac {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(CryptoError::BadSerializedForm {
                expected: "iv:mac:ciphertext",
                found: parts.len(),
            });
        }

        let iv: [u8; IV_SIZE] = BASE64
            .decode(parts[0])?
            .try_into()
            .map_err(|_| CryptoError::Malformed)?;
        let mac: [u8; MAC_SIZE] = BASE64
            .decode(parts[1])?
            .try_into()
            .map_err(|_| CryptoError::Malformed)?;
        let ciphertext = BASE64.decode(parts[2])?;

        Ok(Self { ciphertext, iv, mac })
    }
}

/// Ciphered byte array with IV and MAC, for attachment bodies: the bytes
/// travel separately from the `base64(iv):base64(mac)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherBytesIvMac {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
    pub mac: [u8; MAC_SIZE],
}

impl CipherBytesIvMac {
    pub fn joined_iv_and_mac(&self) -> String {
        format!("{}:{}", BASE64.encode(self.iv), BASE64.encode(self.mac))
    }

    /// Rebuild a bundle from raw ciphertext and a `iv:mac` string.
    pub fn from_parts(ciphertext: Vec<u8>, iv_and_mac: &str) -> Result<Self, CryptoError> {
        let parts: Vec<&str> = iv_and_mac.split(':').collect();
        if parts.len() != 2 {
            return Err(CryptoError::BadSerializedForm {
                expected: "iv:mac",
                found: parts.len(),
            });
        }

        let iv: [u8; IV_SIZE] = BASE64
            .decode(parts[0])?
            .try_into()
            .map_err(|_| CryptoError::Malformed)?;
        let mac: [u8; MAC_SIZE] = BASE64
            .decode(parts[1])?
            .try_into()
            .map_err(|_| CryptoError::Malformed)?;

        Ok(Self { ciphertext, iv, mac })
    }
}

fn generate_iv() -> Result<[u8; IV_SIZE], CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|_| CryptoError::RandomSource)?;
    Ok(iv)
}

fn compute_mac(iv: &[u8], ciphertext: &[u8], keys: &SecretKeys) -> Result<[u8; MAC_SIZE], CryptoError> {
    let mut hmac = HmacSha256::new_from_slice(&keys.mac)
        .map_err(|_| CryptoError::InvalidKey("HMAC key rejected".into()))?;
    hmac.update(iv);
    hmac.update(ciphertext);
    Ok(hmac.finalize().into_bytes().into())
}

fn cbc_encrypt(plaintext: &[u8], iv: &[u8; IV_SIZE], keys: &SecretKeys) -> Vec<u8> {
    Aes128CbcEnc::new((&keys.aes).into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

fn cbc_decrypt(
    ciphertext: &[u8],
    iv: &[u8; IV_SIZE],
    keys: &SecretKeys,
) -> Result<Vec<u8>, CryptoError> {
    Aes128CbcDec::new((&keys.aes).into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Malformed)
}

/// Encrypt a plaintext under a fresh random IV and attach the MAC.
///
/// Two calls on the same input produce different bundles (IV freshness).
pub fn encrypt(plaintext: &[u8], keys: &SecretKeys) -> Result<CipherTextIvMac, CryptoError> {
    let iv = generate_iv()?;
    let ciphertext = cbc_encrypt(plaintext, &iv, keys);
    let mac = compute_mac(&iv, &ciphertext, keys)?;
    Ok(CipherTextIvMac { ciphertext, iv, mac })
}

/// Encrypt raw bytes (attachment bodies) under a fresh random IV.
pub fn encrypt_bytes(bytes: &[u8], keys: &SecretKeys) -> Result<CipherBytesIvMac, CryptoError> {
    let iv = generate_iv()?;
    let ciphertext = cbc_encrypt(bytes, &iv, keys);
    let mac = compute_mac(&iv, &ciphertext, keys)?;
    Ok(CipherBytesIvMac { ciphertext, iv, mac })
}

/// Verify the MAC and decrypt. The cipher is never run on ciphertext that
/// failed the integrity check.
pub fn decrypt(bundle: &CipherTextIvMac, keys: &SecretKeys) -> Result<Vec<u8>, CryptoError> {
    let computed = compute_mac(&bundle.iv, &bundle.ciphertext, keys)?;
    if !constant_time_eq(&computed, &bundle.mac) {
        return Err(CryptoError::IntegrityCheckFailed);
    }
    cbc_decrypt(&bundle.ciphertext, &bundle.iv, keys)
}

/// Verify the MAC and decrypt an attachment body.
pub fn decrypt_bytes(bundle: &CipherBytesIvMac, keys: &SecretKeys) -> Result<Vec<u8>, CryptoError> {
    let computed = compute_mac(&bundle.iv, &bundle.ciphertext, keys)?;
    if !constant_time_eq(&computed, &bundle.mac) {
        return Err(CryptoError::IntegrityCheckFailed);
    }
    cbc_decrypt(&bundle.ciphertext, &bundle.iv, keys)
}

/// Encrypt a UTF-8 string, returning the `iv:mac:ciphertext` string form.
pub fn encrypt_string(plaintext: &str, keys: &SecretKeys) -> Result<String, CryptoError> {
    Ok(encrypt(plaintext.as_bytes(), keys)?.to_string())
}

/// Decrypt an `iv:mac:ciphertext` string back into UTF-8.
pub fn decrypt_string(encrypted: &str, keys: &SecretKeys) -> Result<String, CryptoError> {
    let bundle: CipherTextIvMac = encrypted.parse()?;
    let bytes = decrypt(&bundle, keys)?;
    String::from_utf8(bytes).map_err(|_| CryptoError::Malformed)
}

/// Constant-time byte equality. A length mismatch short-circuits to
/// `false`; equal-length buffers are compared without data-dependent
/// branches.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

// ---------------------------------------------------------------------------
// File variants
// ---------------------------------------------------------------------------

/// Optional memory-pressure check for large file operations.
///
/// When enabled, a file whose projected in-memory size exceeds
/// `budget_bytes` minus a fixed safety margin is rejected mid-stream with
/// an out-of-memory sentinel instead of crashing the process.
#[derive(Debug, Clone, Copy)]
pub struct MemoryGuard {
    pub budget_bytes: u64,
}

impl MemoryGuard {
    pub fn new(budget_bytes: u64) -> Self {
        Self { budget_bytes }
    }

    fn allows(&self, projected_bytes: u64) -> bool {
        projected_bytes <= self.budget_bytes.saturating_sub(MEMORY_GUARD_MARGIN)
    }
}

/// Ciphered file bytes with IV but no MAC (file transfer format).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherBytesIv {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
}

/// Result of a guarded file encryption.
#[derive(Debug)]
pub enum FileCipherOutcome {
    Completed(CipherBytesIv),
    OutOfMemory,
}

/// Result of a guarded file decryption.
#[derive(Debug)]
pub enum FileBytesOutcome {
    Completed(Vec<u8>),
    OutOfMemory,
}

/// Encrypt a file's contents, streaming reads through a fixed buffer.
///
/// With a guard, the projected size is checked before each buffered read
/// and the operation aborts with [`FileCipherOutcome::OutOfMemory`] when
/// it would exceed the budget.
pub fn encrypt_file(
    path: &Path,
    keys: &SecretKeys,
    guard: Option<&MemoryGuard>,
) -> Result<FileCipherOutcome, CryptoError> {
    let file = File::open(path)?;
    let projected = file.metadata()?.len();

    let plaintext = match read_guarded(file, projected, guard)? {
        Some(bytes) => bytes,
        None => return Ok(FileCipherOutcome::OutOfMemory),
    };

    let iv = generate_iv()?;
    let ciphertext = cbc_encrypt(&plaintext, &iv, keys);
    Ok(FileCipherOutcome::Completed(CipherBytesIv { ciphertext, iv }))
}

/// Decrypt file bytes produced by [`encrypt_file`], with the same optional
/// memory guard.
pub fn decrypt_file_bytes(
    bundle: &CipherBytesIv,
    keys: &SecretKeys,
    guard: Option<&MemoryGuard>,
) -> Result<FileBytesOutcome, CryptoError> {
    let projected = bundle.ciphertext.len() as u64;
    if let Some(guard) = guard {
        if !guard.allows(projected) {
            return Ok(FileBytesOutcome::OutOfMemory);
        }
    }

    let plaintext = cbc_decrypt(&bundle.ciphertext, &bundle.iv, keys)?;
    Ok(FileBytesOutcome::Completed(plaintext))
}

fn read_guarded(
    mut file: File,
    projected: u64,
    guard: Option<&MemoryGuard>,
) -> Result<Option<Vec<u8>>, CryptoError> {
    if let Some(guard) = guard {
        if !guard.allows(projected) {
            return Ok(None);
        }
    }

    let mut contents = Vec::with_capacity(projected.min(u32::MAX as u64) as usize);
    let mut buffer = [0u8; FILE_CRYPTO_BUFFER_SIZE];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        contents.extend_from_slice(&buffer[..read]);

        // the file may be longer than its metadata claimed; re-check
        // against what was actually accumulated
        if let Some(guard) = guard {
            if !guard.allows(contents.len() as u64) {
                return Ok(None);
            }
        }
    }

    Ok(Some(contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_keys() -> SecretKeys {
        generate_keys().unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let keys = test_keys();
        let plaintext = b"the quick brown fox";

        let bundle = encrypt(plaintext, &keys).unwrap();
        let decrypted = decrypt(&bundle, &keys).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_iv_freshness() {
        let keys = test_keys();
        let plaintext = b"same plaintext";

        let a = encrypt(plaintext, &keys).unwrap();
        let b = encrypt(plaintext, &keys).unwrap();

        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_mac_bit_flip_fails_integrity() {
        let keys = test_keys();
        let mut bundle = encrypt(b"payload", &keys).unwrap();

        for bit in 0..8 {
            bundle.mac[0] ^= 1 << bit;
            match decrypt(&bundle, &keys) {
                Err(CryptoError::IntegrityCheckFailed) => {}
                other => panic!("expected integrity failure, got {:?}", other),
            }
            bundle.mac[0] ^= 1 << bit;
        }
    }

    #[test]
    fn test_wrong_key_fails_integrity() {
        let bundle = encrypt(b"payload", &test_keys()).unwrap();
        assert!(matches!(
            decrypt(&bundle, &test_keys()),
            Err(CryptoError::IntegrityCheckFailed)
        ));
    }

    #[test]
    fn test_keys_string_roundtrip() {
        let keys = test_keys();
        let restored: SecretKeys = keys.to_string().parse().unwrap();
        assert_eq!(keys, restored);
    }

    #[test]
    fn test_bundle_string_roundtrip() {
        let keys = test_keys();
        let bundle = encrypt(b"string form", &keys).unwrap();
        let restored: CipherTextIvMac = bundle.to_string().parse().unwrap();
        assert_eq!(bundle, restored);
        assert_eq!(decrypt(&restored, &keys).unwrap(), b"string form");
    }

    #[test]
    fn test_password_derivation_deterministic() {
        let salt = generate_salt().unwrap();
        let a = generate_key_from_password("hunter2", &salt);
        let b = generate_key_from_password("hunter2", &salt);
        assert_eq!(a, b);

        let c = generate_key_from_password("hunter3", &salt);
        assert_ne!(a, c);
    }

    #[test]
    fn test_password_roundtrip_via_string_forms() {
        let salt = generate_salt().unwrap();
        let keys = generate_key_from_password("correct horse", &salt);

        let encrypted = encrypt_string("battery staple", &keys).unwrap();
        let decrypted = decrypt_string(&encrypted, &keys).unwrap();
        assert_eq!(decrypted, "battery staple");
    }

    #[test]
    fn test_constant_time_eq_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"", b"a"));
        assert!(constant_time_eq(b"", b""));
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
    }

    #[test]
    fn test_attachment_bytes_roundtrip() {
        let keys = test_keys();
        let data = vec![0x42u8; 3000];

        let bundle = encrypt_bytes(&data, &keys).unwrap();
        let restored =
            CipherBytesIvMac::from_parts(bundle.ciphertext.clone(), &bundle.joined_iv_and_mac())
                .unwrap();
        assert_eq!(decrypt_bytes(&restored, &keys).unwrap(), data);
    }

    #[test]
    fn test_file_roundtrip() {
        let keys = test_keys();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![7u8; 4096]).unwrap();

        let outcome = encrypt_file(file.path(), &keys, None).unwrap();
        let bundle = match outcome {
            FileCipherOutcome::Completed(b) => b,
            FileCipherOutcome::OutOfMemory => panic!("unexpected OOM"),
        };

        match decrypt_file_bytes(&bundle, &keys, None).unwrap() {
            FileBytesOutcome::Completed(bytes) => assert_eq!(bytes, vec![7u8; 4096]),
            FileBytesOutcome::OutOfMemory => panic!("unexpected OOM"),
        }
    }

    #[test]
    fn test_memory_guard_sentinel() {
        let keys = test_keys();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 1024]).unwrap();

        // Budget smaller than the margin: everything is rejected.
        let guard = MemoryGuard::new(1);
        match encrypt_file(file.path(), &keys, Some(&guard)).unwrap() {
            FileCipherOutcome::OutOfMemory => {}
            FileCipherOutcome::Completed(_) => panic!("guard should have tripped"),
        }
    }

    #[test]
    fn test_guard_rechecks_as_contents_grow() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[9u8; 4 * FILE_CRYPTO_BUFFER_SIZE]).unwrap();

        // An understated projection must not get the whole file past the
        // guard: the budget admits 2 KiB, the file holds 4 KiB.
        let guard = MemoryGuard::new(MEMORY_GUARD_MARGIN + 2 * FILE_CRYPTO_BUFFER_SIZE as u64);
        let reopened = File::open(file.path()).unwrap();
        let result = read_guarded(reopened, FILE_CRYPTO_BUFFER_SIZE as u64, Some(&guard)).unwrap();
        assert!(result.is_none());

        // The honest projection is rejected up front.
        let reopened = File::open(file.path()).unwrap();
        let result =
            read_guarded(reopened, 4 * FILE_CRYPTO_BUFFER_SIZE as u64, Some(&guard)).unwrap();
        assert!(result.is_none());

        // Within budget, the read completes.
        let roomy = MemoryGuard::new(MEMORY_GUARD_MARGIN + 4 * FILE_CRYPTO_BUFFER_SIZE as u64);
        let reopened = File::open(file.path()).unwrap();
        let contents = read_guarded(reopened, 4 * FILE_CRYPTO_BUFFER_SIZE as u64, Some(&roomy))
            .unwrap()
            .expect("read should fit the budget");
        assert_eq!(contents.len(), 4 * FILE_CRYPTO_BUFFER_SIZE);
    }
}
