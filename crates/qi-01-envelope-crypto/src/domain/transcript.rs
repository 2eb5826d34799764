//! # Signature Transcript
//!
//! Canonical byte sequence the server signs and the client re-derives:
//!
//! ```text
//! version(1) || "kem:sig:aead:kdf" || context || ct_kem || nonce || aad || ciphertext || server_sig_pk
//! ```

use super::codec::concat;
use super::entities::DecodedEnvelope;
use super::errors::{CryptoError, Result};

/// Build the transcript for a decoded envelope under `context`.
///
/// Fails with `SignatureInvalid` when the version does not fit the single
/// version byte of the transcript.
pub fn build_transcript(envelope: &DecodedEnvelope, context: &str) -> Result<Vec<u8>> {
    let version = u8::try_from(envelope.version).map_err(|_| {
        CryptoError::signature(format!("version {} does not fit in a byte", envelope.version))
    })?;
    let suite = envelope.algs.ciphersuite();

    Ok(concat(&[
        &[version],
        suite.as_bytes(),
        context.as_bytes(),
        &envelope.ct_kem,
        &envelope.nonce,
        &envelope.aad,
        &envelope.ciphertext,
        &envelope.server_sig_pk,
    ]))
}
