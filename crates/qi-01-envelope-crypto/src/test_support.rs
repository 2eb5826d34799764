//! # Test Support
//!
//! Counterpart sealer and deterministic primitives for tests.
//!
//! - `TestKem`: hash-based KEM, `ct = ss XOR SHA-256(pk)` with `pk = SHA-256(sk)`
//! - `Ed25519Primitive`: Ed25519 in place of ML-DSA-65
//! - `EnvelopeSealer`: produces envelopes the service accepts
//! - `GatedSignature`: Ed25519 that holds each verification until released
//!
//! Not for production use.

use crate::domain::aead::{self, NONCE_LEN};
use crate::domain::codec::to_base64url;
use crate::domain::entities::{AlgorithmSuite, DecodedEnvelope, Envelope, KeyPair};
use crate::domain::kdf::derive_key;
use crate::domain::transcript::build_transcript;
use crate::ports::outbound::{KemDecapsulator, PrimitiveError, SignaturePrimitive};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::{mpsc, Mutex};
use std::time::Duration;

/// Context string used by test sessions.
pub const TEST_CONTEXT: &str = "quantum-inbox:email:v1";

/// Hash-based KEM with 32-byte keys, secrets and ciphertexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestKem;

impl TestKem {
    fn pad(public_key: &[u8]) -> [u8; 32] {
        Sha256::digest(public_key).into()
    }

    /// Public key for a secret key.
    pub fn public_key(secret_key: &[u8]) -> Vec<u8> {
        Sha256::digest(secret_key).to_vec()
    }

    /// Encapsulate `shared_secret` to `public_key`.
    pub fn encapsulate(public_key: &[u8], shared_secret: &[u8; 32]) -> Vec<u8> {
        let pad = Self::pad(public_key);
        shared_secret.iter().zip(pad).map(|(s, p)| s ^ p).collect()
    }
}

impl KemDecapsulator for TestKem {
    fn decapsulate(&self, ciphertext: &[u8], secret_key: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        if ciphertext.len() != 32 {
            return Err(PrimitiveError::InvalidInput(format!(
                "ciphertext must be 32 bytes, got {}",
                ciphertext.len()
            )));
        }
        let pad = Self::pad(&Self::public_key(secret_key));
        Ok(ciphertext.iter().zip(pad).map(|(c, p)| c ^ p).collect())
    }
}

/// Deterministic test key pair.
pub fn test_keypair(seed: u8) -> KeyPair {
    let secret = Sha256::digest([b"qi-test-kem".as_slice(), &[seed]].concat()).to_vec();
    KeyPair::new(TestKem::public_key(&secret), secret)
}

/// Ed25519 verification behind the signature port.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Primitive;

impl SignaturePrimitive for Ed25519Primitive {
    fn verify(
        &self,
        signature: &[u8],
        message: &[u8],
        public_key: &[u8],
    ) -> Result<bool, PrimitiveError> {
        let pk: [u8; 32] = public_key
            .try_into()
            .map_err(|_| PrimitiveError::InvalidKey("Ed25519 key must be 32 bytes".into()))?;
        let vk = VerifyingKey::from_bytes(&pk)
            .map_err(|e| PrimitiveError::InvalidKey(e.to_string()))?;
        let sig = Signature::from_slice(signature)
            .map_err(|e| PrimitiveError::InvalidInput(e.to_string()))?;
        Ok(vk.verify_strict(message, &sig).is_ok())
    }
}

/// Ed25519 verification that blocks until its [`SignatureGate`] releases it.
///
/// Lets a test act while a decryption is in flight.
pub struct GatedSignature {
    entered: mpsc::Sender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// Test-side handle of a [`GatedSignature`].
pub struct SignatureGate {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl GatedSignature {
    /// Primitive and its gate.
    pub fn new() -> (Self, SignatureGate) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        (
            Self {
                entered: entered_tx,
                release: Mutex::new(release_rx),
            },
            SignatureGate {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl SignaturePrimitive for GatedSignature {
    fn verify(
        &self,
        signature: &[u8],
        message: &[u8],
        public_key: &[u8],
    ) -> Result<bool, PrimitiveError> {
        let _ = self.entered.send(());
        if let Ok(release) = self.release.lock() {
            // Returns early once the gate is dropped.
            let _ = release.recv();
        }
        Ed25519Primitive.verify(signature, message, public_key)
    }
}

impl SignatureGate {
    /// Block until a verification is held, or `timeout` passes.
    pub fn wait_entered(&self, timeout: Duration) -> bool {
        self.entered.recv_timeout(timeout).is_ok()
    }

    /// Let one held verification continue.
    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

/// Server-side counterpart producing signed envelopes.
pub struct EnvelopeSealer {
    signing_key: SigningKey,
    context: String,
}

impl EnvelopeSealer {
    /// Sealer with a deterministic signing key under `TEST_CONTEXT`.
    pub fn new(seed: u8) -> Self {
        Self::with_context(seed, TEST_CONTEXT)
    }

    /// Sealer with a custom context string.
    pub fn with_context(seed: u8, context: &str) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&[seed; 32]),
            context: context.to_string(),
        }
    }

    /// Server signing public key.
    pub fn server_public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Seal `plaintext` to `recipient_public_key` with the session suite.
    pub fn seal(&self, plaintext: &[u8], recipient_public_key: &[u8]) -> Envelope {
        self.seal_with(
            plaintext,
            recipient_public_key,
            b"qi-test-aad",
            1,
            AlgorithmSuite::default(),
        )
    }

    /// Seal with explicit aad, version and suite.
    pub fn seal_with(
        &self,
        plaintext: &[u8],
        recipient_public_key: &[u8],
        aad: &[u8],
        version: u32,
        algs: AlgorithmSuite,
    ) -> Envelope {
        let mut rng = rand::thread_rng();
        let mut shared_secret = [0u8; 32];
        rng.fill_bytes(&mut shared_secret);
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);

        let ct_kem = TestKem::encapsulate(recipient_public_key, &shared_secret);
        let key = derive_key(&shared_secret, &self.context, aad, &ct_kem)
            .expect("key derivation");
        let ciphertext = aead::seal(&key, &nonce, aad, plaintext).expect("aead seal");

        let decoded = DecodedEnvelope {
            version,
            ct_kem,
            nonce: nonce.to_vec(),
            aad: aad.to_vec(),
            ciphertext,
            signature: Vec::new(),
            server_sig_pk: self.server_public_key().to_vec(),
            algs,
        };
        let transcript = build_transcript(&decoded, &self.context).expect("transcript");
        let signature = self.signing_key.sign(&transcript);

        Envelope {
            v: decoded.version,
            ct_kem: to_base64url(&decoded.ct_kem),
            nonce: to_base64url(&decoded.nonce),
            aad: to_base64url(&decoded.aad),
            ciphertext: to_base64url(&decoded.ciphertext),
            sig: to_base64url(&signature.to_bytes()),
            server_sig_pk: to_base64url(&decoded.server_sig_pk),
            algs: decoded.algs,
        }
    }
}
