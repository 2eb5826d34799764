//! # Envelope Crypto Errors
//!
//! Error types for verification and decryption of envelopes.
//!
//! Only two failure kinds ever leave this crate. Signature failures stay
//! distinct from decryption failures because they may indicate tampering.

use thiserror::Error;

/// Errors that can occur while verifying or decrypting an envelope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Transcript/signature mismatch, malformed signature fields, or an
    /// unexpected server signing key.
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// KEM decapsulation, key derivation, AEAD, or post-decrypt parse failure.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
}

impl CryptoError {
    /// Shorthand for a signature failure.
    pub fn signature(reason: impl Into<String>) -> Self {
        Self::SignatureInvalid(reason.into())
    }

    /// Shorthand for a decryption failure.
    pub fn decryption(reason: impl Into<String>) -> Self {
        Self::DecryptionFailed(reason.into())
    }

    /// Whether this failure came from signature verification.
    pub fn is_signature_failure(&self) -> bool {
        matches!(self, Self::SignatureInvalid(_))
    }
}

/// Result type for envelope crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
