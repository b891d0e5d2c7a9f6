//! Passphrase-derived authenticated encryption for peer payloads
//!
//! Wire format: `base64( salt(16) ‖ iv(12) ‖ ciphertext‖tag )` with a
//! 256-bit AES-GCM key derived per call via PBKDF2-HMAC-SHA256. No key
//! material is ever persisted; each call re-derives from the passphrase
//! and the blob's embedded salt.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::CryptoError;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;
/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 120_000;

const KEY_LEN: usize = 32;

fn derive_key(passphrase: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// Encrypt `plaintext` under a key derived from `passphrase`.
///
/// Generates a fresh random salt and nonce for every call.
pub fn encrypt(plaintext: &[u8], passphrase: &str) -> Result<String, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::InvalidInput("empty passphrase".to_string()));
    }

    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    getrandom::getrandom(&mut salt)
        .and_then(|()| getrandom::getrandom(&mut nonce))
        .map_err(|e| CryptoError::InvalidInput(format!("rng failure: {e}")))?;

    let key = derive_key(passphrase, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::InvalidInput("encryption failed".to_string()))?;

    let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(blob))
}

/// Decrypt a blob produced by [`encrypt`].
///
/// Fails with [`CryptoError::AuthenticationFailure`] when the tag check
/// fails (wrong passphrase or corrupted data) and
/// [`CryptoError::MalformedBlob`] when the decoded bytes are too short to
/// contain salt, nonce and at least one ciphertext byte.
pub fn decrypt(blob_base64: &str, passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::InvalidInput("empty passphrase".to_string()));
    }

    let blob = BASE64
        .decode(blob_base64.trim())
        .map_err(|e| CryptoError::MalformedBlob(format!("invalid base64: {e}")))?;

    if blob.len() < SALT_LEN + NONCE_LEN + 1 {
        return Err(CryptoError::MalformedBlob(format!(
            "blob too short: {} bytes",
            blob.len()
        )));
    }

    let (salt, rest) = blob.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(passphrase, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthenticationFailure)
}
