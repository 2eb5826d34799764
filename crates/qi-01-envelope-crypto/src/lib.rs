//! # Envelope Crypto (QI-01)
//!
//! Verification and decryption of the signed, encrypted envelopes a
//! Quantum-Inbox gateway delivers.
//!
//! ## Architecture
//!
//! This crate follows hexagonal architecture:
//! - **Domain Layer** (`domain/`): codec, transcript, key derivation, AEAD, no I/O
//! - **Ports Layer** (`ports/`): inbound API and outbound KEM/signature primitives
//! - **Service Layer** (`service.rs`): wires the decrypt sequence to the ports
//! - **Adapters** (`adapters/`): ML-KEM-768 and ML-DSA-65 bindings
//!
//! ## Security Notes
//!
//! - The server signature is checked against a transcript rebuilt from the
//!   envelope's own fields before the inbox secret key is used.
//! - Signature failures are reported separately from decryption failures.
//! - Derived keys and shared secrets are zeroized and never logged.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

// Re-export public API
pub use domain::codec::{from_base64url, to_base64url, DecodeError};
pub use domain::entities::{
    AlgorithmSuite, AttachmentData, DecodedEnvelope, EmailMetadata, Envelope, KeyPair,
    ParsedContent, SecretKeyBytes, AEAD_ALGORITHM, ENVELOPE_VERSION, KDF_ALGORITHM,
    KEM_ALGORITHM, SIG_ALGORITHM,
};
pub use domain::errors::{CryptoError, Result};
pub use domain::kdf::{derive_key, DerivedKey};
pub use ports::inbound::EnvelopeDecryptionApi;
pub use ports::outbound::{KemDecapsulator, PrimitiveError, SignaturePrimitive};
pub use service::{CryptoContext, EnvelopeCryptoService};

#[cfg(feature = "pq")]
pub use adapters::{MlDsa65Verifier, MlKem768Decapsulator};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
