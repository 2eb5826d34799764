//! # Envelope Crypto Service
//!
//! Application service implementing `EnvelopeDecryptionApi`.
//!
//! ## Decrypt sequence
//!
//! 1. Verify the server signature over the transcript (fail: `SignatureInvalid`)
//! 2. Check version and algorithm suite
//! 3. Decapsulate the KEM ciphertext with the inbox secret key
//! 4. Derive the AEAD key
//! 5. Open the ciphertext
//!
//! Step 1 always completes before the secret key is touched.

use crate::domain::aead;
use crate::domain::codec::{from_base64url, owned};
use crate::domain::entities::{
    AlgorithmSuite, DecodedEnvelope, EmailMetadata, Envelope, KeyPair, ParsedContent,
    ENVELOPE_VERSION,
};
use crate::domain::errors::{CryptoError, Result};
use crate::domain::kdf::derive_key;
use crate::domain::transcript::build_transcript;
use crate::ports::inbound::EnvelopeDecryptionApi;
use crate::ports::outbound::{KemDecapsulator, SignaturePrimitive};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use tracing::debug;
use zeroize::Zeroizing;

/// Session parameters bound into every verification and decryption.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CryptoContext {
    /// Domain-separation tag, e.g. `"quantum-inbox:email:v1"`.
    pub context: String,
    /// Expected server signing key. Envelopes carrying a different key are
    /// rejected before the transcript is built.
    pub pinned_server_key: Option<Vec<u8>>,
    /// Accepted algorithm suite.
    pub suite: AlgorithmSuite,
}

impl CryptoContext {
    /// Context with the session suite and no pinned key.
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            pinned_server_key: None,
            suite: AlgorithmSuite::session_default(),
        }
    }

    /// Pin the server signing key.
    pub fn with_pinned_server_key(mut self, key: Vec<u8>) -> Self {
        self.pinned_server_key = Some(key);
        self
    }
}

/// Envelope verification and decryption service.
pub struct EnvelopeCryptoService<K: KemDecapsulator, S: SignaturePrimitive> {
    kem: K,
    signature: S,
    context: CryptoContext,
}

impl<K: KemDecapsulator, S: SignaturePrimitive> EnvelopeCryptoService<K, S> {
    /// Create a new service over the given primitives.
    pub fn new(kem: K, signature: S, context: CryptoContext) -> Self {
        Self {
            kem,
            signature,
            context,
        }
    }

    /// Session parameters in use.
    pub fn context(&self) -> &CryptoContext {
        &self.context
    }

    fn verify_decoded(&self, envelope: &Envelope) -> Result<DecodedEnvelope> {
        let decoded = envelope
            .decode()
            .map_err(|e| CryptoError::signature(e.to_string()))?;

        if let Some(pinned) = &self.context.pinned_server_key {
            if pinned != &decoded.server_sig_pk {
                return Err(CryptoError::signature("unexpected server signing key"));
            }
        }

        let transcript = build_transcript(&decoded, &self.context.context)?;
        let valid = self
            .signature
            .verify(
                &owned(&decoded.signature),
                &transcript,
                &owned(&decoded.server_sig_pk),
            )
            .map_err(|e| CryptoError::signature(e.to_string()))?;

        if !valid {
            return Err(CryptoError::signature("transcript signature mismatch"));
        }
        Ok(decoded)
    }

    fn check_suite(&self, decoded: &DecodedEnvelope) -> Result<()> {
        if decoded.version != ENVELOPE_VERSION {
            return Err(CryptoError::decryption(format!(
                "unsupported envelope version {}",
                decoded.version
            )));
        }
        if decoded.algs != self.context.suite {
            return Err(CryptoError::decryption(format!(
                "unsupported algorithm suite {}",
                decoded.algs.ciphersuite()
            )));
        }
        Ok(())
    }

    fn open(&self, decoded: &DecodedEnvelope, keypair: &KeyPair) -> Result<Vec<u8>> {
        let shared_secret = Zeroizing::new(
            self.kem
                .decapsulate(&owned(&decoded.ct_kem), keypair.secret_key.as_bytes())
                .map_err(|e| CryptoError::decryption(e.to_string()))?,
        );

        let key = derive_key(
            &shared_secret,
            &self.context.context,
            &decoded.aad,
            &decoded.ct_kem,
        )?;

        aead::open(&key, &decoded.nonce, &decoded.aad, &decoded.ciphertext)
    }

    fn decrypt_json<T: DeserializeOwned>(
        &self,
        envelope: &Envelope,
        keypair: &KeyPair,
        what: &str,
    ) -> Result<T> {
        let plaintext = Zeroizing::new(self.decrypt(envelope, keypair)?);
        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::decryption(format!("{what} is not valid JSON: {e}")))
    }
}

impl<K: KemDecapsulator, S: SignaturePrimitive> EnvelopeDecryptionApi
    for EnvelopeCryptoService<K, S>
{
    fn verify(&self, envelope: &Envelope) -> Result<()> {
        self.verify_decoded(envelope).map(|_| ())
    }

    fn decrypt(&self, envelope: &Envelope, keypair: &KeyPair) -> Result<Vec<u8>> {
        let decoded = self.verify_decoded(envelope).map_err(|e| {
            debug!(error = %e, "envelope rejected before decryption");
            e
        })?;
        self.check_suite(&decoded)?;
        self.open(&decoded, keypair).map_err(|e| {
            debug!(error = %e, "envelope decryption failed");
            e
        })
    }

    fn decrypt_metadata(&self, envelope: &Envelope, keypair: &KeyPair) -> Result<EmailMetadata> {
        self.decrypt_json(envelope, keypair, "metadata")
    }

    fn decrypt_parsed(&self, envelope: &Envelope, keypair: &KeyPair) -> Result<ParsedContent> {
        self.decrypt_json(envelope, keypair, "parsed content")
    }

    fn decrypt_raw(&self, envelope: &Envelope, keypair: &KeyPair) -> Result<Vec<u8>> {
        let plaintext = Zeroizing::new(self.decrypt(envelope, keypair)?);
        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::decryption("raw message is not UTF-8 base64"))?
            .trim();

        STANDARD
            .decode(text)
            .or_else(|_| from_base64url("raw", text))
            .map_err(|_| CryptoError::decryption("raw message is not base64"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::outbound::PrimitiveError;
    use crate::test_support::{
        test_keypair, Ed25519Primitive, EnvelopeSealer, TestKem, TEST_CONTEXT,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct CountingKem {
        calls: Arc<AtomicUsize>,
    }

    impl KemDecapsulator for CountingKem {
        fn decapsulate(&self, ct: &[u8], sk: &[u8]) -> std::result::Result<Vec<u8>, PrimitiveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            TestKem.decapsulate(ct, sk)
        }
    }

    struct ExplodingSignature;

    impl SignaturePrimitive for ExplodingSignature {
        fn verify(&self, _: &[u8], _: &[u8], _: &[u8]) -> std::result::Result<bool, PrimitiveError> {
            Err(PrimitiveError::Failure("backend unavailable".into()))
        }
    }

    fn setup() -> (EnvelopeSealer, KeyPair, CountingKem) {
        (EnvelopeSealer::new(7), test_keypair(1), CountingKem::default())
    }

    fn service(kem: CountingKem) -> EnvelopeCryptoService<CountingKem, Ed25519Primitive> {
        EnvelopeCryptoService::new(kem, Ed25519Primitive, CryptoContext::new(TEST_CONTEXT))
    }

    #[test]
    fn test_round_trip() {
        let (sealer, kp, kem) = setup();
        let env = sealer.seal(b"hello inbox", &kp.public_key);
        let svc = service(kem.clone());

        assert_eq!(svc.decrypt(&env, &kp).unwrap(), b"hello inbox");
        assert_eq!(kem.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_decrypt_is_idempotent() {
        let (sealer, kp, kem) = setup();
        let env = sealer.seal(b"same", &kp.public_key);
        let svc = service(kem);
        assert_eq!(svc.decrypt(&env, &kp).unwrap(), svc.decrypt(&env, &kp).unwrap());
    }

    #[test]
    fn test_flipped_signature_never_decapsulates() {
        let (sealer, kp, kem) = setup();
        let mut env = sealer.seal(b"secret", &kp.public_key);
        let mut sig = from_base64url("sig", &env.sig).unwrap();
        sig[0] ^= 0x01;
        env.sig = crate::domain::codec::to_base64url(&sig);

        let err = service(kem.clone()).decrypt(&env, &kp).unwrap_err();
        assert!(err.is_signature_failure());
        assert_eq!(kem.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_tampered_aad_is_signature_failure() {
        let (sealer, kp, kem) = setup();
        let mut env = sealer.seal(b"secret", &kp.public_key);
        env.aad = crate::domain::codec::to_base64url(b"forged");

        let err = service(kem.clone()).decrypt(&env, &kp).unwrap_err();
        assert!(err.is_signature_failure());
        assert_eq!(kem.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_malformed_signature_field() {
        let (sealer, kp, kem) = setup();
        let mut env = sealer.seal(b"secret", &kp.public_key);
        env.sig = "not base64!".into();
        assert!(service(kem).decrypt(&env, &kp).unwrap_err().is_signature_failure());
    }

    #[test]
    fn test_primitive_error_is_signature_failure() {
        let (sealer, kp, _) = setup();
        let env = sealer.seal(b"x", &kp.public_key);
        let svc =
            EnvelopeCryptoService::new(TestKem, ExplodingSignature, CryptoContext::new(TEST_CONTEXT));
        assert!(svc.verify(&env).unwrap_err().is_signature_failure());
    }

    #[test]
    fn test_context_mismatch_fails_verification() {
        let (sealer, kp, _) = setup();
        let env = sealer.seal(b"x", &kp.public_key);
        let svc = EnvelopeCryptoService::new(
            TestKem,
            Ed25519Primitive,
            CryptoContext::new("other:email:v1"),
        );
        assert!(svc.decrypt(&env, &kp).unwrap_err().is_signature_failure());
    }

    #[test]
    fn test_pinned_key_mismatch() {
        let (sealer, kp, kem) = setup();
        let env = sealer.seal(b"x", &kp.public_key);
        let ctx = CryptoContext::new(TEST_CONTEXT).with_pinned_server_key(vec![0u8; 32]);
        let svc = EnvelopeCryptoService::new(kem.clone(), Ed25519Primitive, ctx);

        assert!(svc.decrypt(&env, &kp).unwrap_err().is_signature_failure());
        assert_eq!(kem.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pinned_key_match() {
        let (sealer, kp, kem) = setup();
        let env = sealer.seal(b"pinned", &kp.public_key);
        let ctx = CryptoContext::new(TEST_CONTEXT)
            .with_pinned_server_key(sealer.server_public_key().to_vec());
        let svc = EnvelopeCryptoService::new(kem, Ed25519Primitive, ctx);
        assert_eq!(svc.decrypt(&env, &kp).unwrap(), b"pinned");
    }

    #[test]
    fn test_wrong_secret_key_is_decryption_failure() {
        let (sealer, kp, kem) = setup();
        let env = sealer.seal(b"x", &kp.public_key);
        let err = service(kem).decrypt(&env, &test_keypair(2)).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));
    }

    #[test]
    fn test_unsupported_version_after_verification() {
        let (sealer, kp, kem) = setup();
        let env = sealer.seal_with(b"x", &kp.public_key, b"", 2, AlgorithmSuite::default());
        let svc = service(kem.clone());

        assert!(svc.verify(&env).is_ok());
        let err = svc.decrypt(&env, &kp).unwrap_err();
        assert!(err.to_string().contains("version"));
        assert_eq!(kem.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsupported_suite() {
        let (sealer, kp, kem) = setup();
        let mut suite = AlgorithmSuite::default();
        suite.aead = "CHACHA20-POLY1305".into();
        let env = sealer.seal_with(b"x", &kp.public_key, b"", 1, suite);
        let err = service(kem).decrypt(&env, &kp).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));
    }

    #[test]
    fn test_decrypt_metadata() {
        let (sealer, kp, kem) = setup();
        let json = br#"{"id":"e1","from":"a@x.test","to":["b@x.test"],"subject":"Reset","receivedAt":"2024-05-01T10:00:00Z"}"#;
        let env = sealer.seal(json, &kp.public_key);

        let meta = service(kem).decrypt_metadata(&env, &kp).unwrap();
        assert_eq!(meta.subject, "Reset");
        assert_eq!(meta.id.as_deref(), Some("e1"));
    }

    #[test]
    fn test_decrypt_metadata_bad_json() {
        let (sealer, kp, kem) = setup();
        let env = sealer.seal(b"{not json", &kp.public_key);
        let err = service(kem).decrypt_metadata(&env, &kp).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));
    }

    #[test]
    fn test_decrypt_parsed() {
        let (sealer, kp, kem) = setup();
        let json = br#"{"text":"hi","links":["https://x.test/reset"],"attachments":[]}"#;
        let env = sealer.seal(json, &kp.public_key);
        let parsed = service(kem).decrypt_parsed(&env, &kp).unwrap();
        assert_eq!(parsed.text.as_deref(), Some("hi"));
        assert_eq!(parsed.links.len(), 1);
    }

    #[test]
    fn test_decrypt_raw_unwraps_base64() {
        let (sealer, kp, kem) = setup();
        let raw = b"Subject: hi\r\n\r\nbody";
        let env = sealer.seal(STANDARD.encode(raw).as_bytes(), &kp.public_key);
        assert_eq!(service(kem).decrypt_raw(&env, &kp).unwrap(), raw);
    }

    #[test]
    fn test_decrypt_raw_rejects_non_base64() {
        let (sealer, kp, kem) = setup();
        let env = sealer.seal(b"%%%", &kp.public_key);
        let err = service(kem).decrypt_raw(&env, &kp).unwrap_err();
        assert!(matches!(err, CryptoError::DecryptionFailed(_)));
    }
}
