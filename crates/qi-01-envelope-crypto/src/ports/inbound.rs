//! # Inbound Ports
//!
//! API trait defining what the envelope crypto service can do.

use crate::domain::{EmailMetadata, Envelope, KeyPair, ParsedContent, Result};

/// Envelope verification and decryption - inbound port.
///
/// Every decrypting operation verifies the envelope signature first and
/// returns `SignatureInvalid` without touching the secret key on failure.
pub trait EnvelopeDecryptionApi: Send + Sync {
    /// Verify the server signature over the envelope transcript.
    fn verify(&self, envelope: &Envelope) -> Result<()>;

    /// Verify, then decrypt to raw plaintext bytes.
    fn decrypt(&self, envelope: &Envelope, keypair: &KeyPair) -> Result<Vec<u8>>;

    /// Decrypt and parse the metadata JSON.
    fn decrypt_metadata(&self, envelope: &Envelope, keypair: &KeyPair) -> Result<EmailMetadata>;

    /// Decrypt and parse the body JSON.
    fn decrypt_parsed(&self, envelope: &Envelope, keypair: &KeyPair) -> Result<ParsedContent>;

    /// Decrypt a base64-wrapped raw message into its bytes.
    fn decrypt_raw(&self, envelope: &Envelope, keypair: &KeyPair) -> Result<Vec<u8>>;
}
