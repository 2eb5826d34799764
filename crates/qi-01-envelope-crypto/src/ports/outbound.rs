//! # Outbound Ports
//!
//! Post-quantum primitives this crate consumes but does not implement.

use thiserror::Error;

/// Failure reported by an external primitive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrimitiveError {
    /// Key material has the wrong size or encoding.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Ciphertext or signature has the wrong size or encoding.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The primitive itself failed.
    #[error("primitive failure: {0}")]
    Failure(String),
}

/// KEM decapsulation - outbound port.
pub trait KemDecapsulator: Send + Sync {
    /// Recover the shared secret from `ciphertext` with `secret_key`.
    fn decapsulate(&self, ciphertext: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, PrimitiveError>;
}

/// Signature verification - outbound port.
pub trait SignaturePrimitive: Send + Sync {
    /// Check `signature` over `message` under `public_key`.
    ///
    /// `Ok(false)` means a well-formed signature that does not verify.
    fn verify(
        &self,
        signature: &[u8],
        message: &[u8],
        public_key: &[u8],
    ) -> Result<bool, PrimitiveError>;
}
