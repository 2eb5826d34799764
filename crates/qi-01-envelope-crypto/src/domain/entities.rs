//! # Domain Entities
//!
//! Wire envelope, key material, and the plaintext shapes carried inside
//! envelopes.

use super::codec::{from_base64url, to_base64url, DecodeError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Envelope format version understood by this client.
pub const ENVELOPE_VERSION: u32 = 1;

/// KEM identifier of the session suite.
pub const KEM_ALGORITHM: &str = "ML-KEM-768";

/// Signature identifier of the session suite.
pub const SIG_ALGORITHM: &str = "ML-DSA-65";

/// AEAD identifier of the session suite.
pub const AEAD_ALGORITHM: &str = "AES-256-GCM";

/// KDF identifier of the session suite.
pub const KDF_ALGORITHM: &str = "HKDF-SHA-512";

/// Algorithm suite named by an envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AlgorithmSuite {
    /// Key-encapsulation mechanism.
    pub kem: String,
    /// Signature scheme.
    pub sig: String,
    /// Authenticated cipher.
    pub aead: String,
    /// Key derivation function.
    pub kdf: String,
}

impl AlgorithmSuite {
    /// The single suite this client accepts.
    pub fn session_default() -> Self {
        Self {
            kem: KEM_ALGORITHM.to_string(),
            sig: SIG_ALGORITHM.to_string(),
            aead: AEAD_ALGORITHM.to_string(),
            kdf: KDF_ALGORITHM.to_string(),
        }
    }

    /// Canonical `kem:sig:aead:kdf` string bound into the transcript.
    pub fn ciphersuite(&self) -> String {
        format!("{}:{}:{}:{}", self.kem, self.sig, self.aead, self.kdf)
    }
}

impl Default for AlgorithmSuite {
    fn default() -> Self {
        Self::session_default()
    }
}

/// Signed, encrypted envelope as produced by the gateway.
///
/// Byte fields are base64url strings. Immutable once received: verification
/// and decryption only ever borrow it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    /// Format version.
    pub v: u32,
    /// KEM ciphertext.
    pub ct_kem: String,
    /// AEAD nonce.
    pub nonce: String,
    /// Additional authenticated data.
    pub aad: String,
    /// AEAD ciphertext (including tag).
    pub ciphertext: String,
    /// Server signature over the transcript.
    pub sig: String,
    /// Server signing public key.
    pub server_sig_pk: String,
    /// Algorithm suite.
    pub algs: AlgorithmSuite,
}

impl Envelope {
    /// Decode every byte field into independently owned buffers.
    pub fn decode(&self) -> Result<DecodedEnvelope, DecodeError> {
        Ok(DecodedEnvelope {
            version: self.v,
            ct_kem: from_base64url("ct_kem", &self.ct_kem)?,
            nonce: from_base64url("nonce", &self.nonce)?,
            aad: from_base64url("aad", &self.aad)?,
            ciphertext: from_base64url("ciphertext", &self.ciphertext)?,
            signature: from_base64url("sig", &self.sig)?,
            server_sig_pk: from_base64url("server_sig_pk", &self.server_sig_pk)?,
            algs: self.algs.clone(),
        })
    }
}

/// Envelope with all byte fields decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedEnvelope {
    /// Format version.
    pub version: u32,
    /// KEM ciphertext.
    pub ct_kem: Vec<u8>,
    /// AEAD nonce.
    pub nonce: Vec<u8>,
    /// Additional authenticated data.
    pub aad: Vec<u8>,
    /// AEAD ciphertext (including tag).
    pub ciphertext: Vec<u8>,
    /// Server signature.
    pub signature: Vec<u8>,
    /// Server signing public key.
    pub server_sig_pk: Vec<u8>,
    /// Algorithm suite.
    pub algs: AlgorithmSuite,
}

/// Secret half of a KEM key pair. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKeyBytes(Vec<u8>);

impl SecretKeyBytes {
    /// Wrap raw secret key bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKeyBytes([REDACTED; {}])", self.0.len())
    }
}

/// KEM key pair owned by one inbox.
#[derive(Clone, Debug)]
pub struct KeyPair {
    /// Encapsulation (public) key.
    pub public_key: Vec<u8>,
    /// Decapsulation (secret) key.
    pub secret_key: SecretKeyBytes,
    /// Base64url form of the public key, as registered with the gateway.
    pub encoded_public_key: String,
}

impl KeyPair {
    /// Build a key pair from raw key bytes.
    pub fn new(public_key: Vec<u8>, secret_key: Vec<u8>) -> Self {
        let encoded_public_key = to_base64url(&public_key);
        Self {
            public_key,
            secret_key: SecretKeyBytes::new(secret_key),
            encoded_public_key,
        }
    }

    /// Rebuild a key pair from base64url-encoded halves.
    pub fn from_base64url(public_key: &str, secret_key: &str) -> Result<Self, DecodeError> {
        Ok(Self::new(
            from_base64url("public_key", public_key)?,
            from_base64url("secret_key", secret_key)?,
        ))
    }
}

/// Metadata plaintext of an email envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EmailMetadata {
    /// Email identifier, when the gateway includes it in the plaintext.
    #[serde(default)]
    pub id: Option<String>,
    /// Sender address.
    #[serde(default)]
    pub from: String,
    /// Recipient addresses.
    #[serde(default, deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Receive timestamp (RFC 3339).
    #[serde(default)]
    pub received_at: String,
}

/// Parsed body plaintext of an email envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ParsedContent {
    /// Plain-text body.
    #[serde(default)]
    pub text: Option<String>,
    /// HTML body.
    #[serde(default)]
    pub html: Option<String>,
    /// Header map.
    #[serde(default)]
    pub headers: BTreeMap<String, serde_json::Value>,
    /// Links extracted by the gateway.
    #[serde(default)]
    pub links: Vec<String>,
    /// Attachments.
    #[serde(default)]
    pub attachments: Vec<AttachmentData>,
}

/// Attachment carried inside parsed content.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentData {
    /// File name.
    pub filename: String,
    /// MIME type.
    #[serde(default)]
    pub content_type: String,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Base64 content.
    #[serde(default)]
    pub content: String,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}
