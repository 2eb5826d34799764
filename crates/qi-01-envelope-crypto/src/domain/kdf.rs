//! # Key Derivation
//!
//! HKDF-SHA-512 with a salt bound to the KEM ciphertext and info bound to the
//! context and the length-prefixed additional data.
//!
//! ```text
//! salt = SHA-256(ct_kem)
//! info = context || u32_be(len(aad)) || aad
//! key  = HKDF-SHA-512(ikm = shared_secret, salt, info)[..32]
//! ```

use super::codec::concat;
use super::errors::{CryptoError, Result};
use hkdf::Hkdf;
use sha2::{Digest, Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a derived key in bytes.
pub const DERIVED_KEY_LEN: usize = 32;

/// Symmetric key scoped to one decrypt call. Zeroized on drop, never logged.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; DERIVED_KEY_LEN]);

impl DerivedKey {
    /// Borrow the key bytes.
    pub fn as_bytes(&self) -> &[u8; DERIVED_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey([REDACTED])")
    }
}

/// Derive the 256-bit AEAD key for an envelope.
pub fn derive_key(
    shared_secret: &[u8],
    context: &str,
    aad: &[u8],
    ct_kem: &[u8],
) -> Result<DerivedKey> {
    let salt = Sha256::digest(ct_kem);
    let aad_len = u32::try_from(aad.len())
        .map_err(|_| CryptoError::decryption("additional data too long"))?;
    let info = concat(&[context.as_bytes(), &aad_len.to_be_bytes(), aad]);

    let hk = Hkdf::<Sha512>::new(Some(salt.as_slice()), shared_secret);
    let mut okm = [0u8; DERIVED_KEY_LEN];
    hk.expand(&info, &mut okm)
        .map_err(|_| CryptoError::decryption("key derivation failed"))?;

    let key = DerivedKey(okm);
    okm.zeroize();
    Ok(key)
}
