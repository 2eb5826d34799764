//! # Authenticated Decryption
//!
//! AES-256-GCM with a 96-bit nonce and a 128-bit tag appended to the
//! ciphertext.

use super::errors::{CryptoError, Result};
use super::kdf::DerivedKey;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Decrypt `ciphertext` (with trailing tag) authenticating `aad`.
pub fn open(key: &DerivedKey, nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::decryption(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::decryption("ciphertext shorter than tag"));
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::decryption("invalid key length"))?;
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::decryption("authentication tag mismatch"))
}

/// Encrypt `plaintext` authenticating `aad`. Used by the counterpart sealer.
#[cfg(any(test, feature = "test-utils"))]
pub fn seal(key: &DerivedKey, nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::decryption("bad nonce length"));
    }
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::decryption("invalid key length"))?;
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::decryption("encryption failed"))
}
