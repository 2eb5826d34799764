//! # Domain Entities
//!
//! Inboxes, gateway payloads, and decrypted emails.

use qi_01_envelope_crypto::{
    AlgorithmSuite, CryptoError, EmailMetadata, Envelope, EnvelopeDecryptionApi, KeyPair,
    ParsedContent,
};
use serde::{Deserialize, Serialize};

/// An ephemeral inbox and the key pair that opens its envelopes.
#[derive(Clone, Debug)]
pub struct Inbox {
    /// Email address, used as the gateway path key.
    pub email_address: String,
    /// Routing hash derived from the inbox public key. Addresses stream
    /// messages without revealing the address.
    pub routing_hash: String,
    /// KEM key pair owned by this inbox.
    pub keypair: KeyPair,
}

impl Inbox {
    /// Create an inbox handle.
    pub fn new(
        email_address: impl Into<String>,
        routing_hash: impl Into<String>,
        keypair: KeyPair,
    ) -> Self {
        Self {
            email_address: email_address.into(),
            routing_hash: routing_hash.into(),
            keypair,
        }
    }
}

/// Cheap change-detection digest of an inbox.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    /// Number of emails in the inbox.
    pub email_count: u64,
    /// Opaque digest of the email set.
    pub emails_hash: String,
}

/// Email as returned by the gateway, still encrypted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEmail {
    /// Email identifier.
    pub id: String,
    /// Read status as stored on the gateway.
    #[serde(default)]
    pub is_read: bool,
    /// Encrypted metadata envelope.
    pub encrypted_metadata: Envelope,
    /// Encrypted parsed body, present on single-email fetches.
    #[serde(default)]
    pub encrypted_parsed: Option<Envelope>,
}

/// Message pushed over the event stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamMessage {
    /// Routing hash of the target inbox.
    pub inbox_id: String,
    /// Email identifier.
    #[serde(alias = "itemId")]
    pub email_id: String,
    /// Encrypted metadata envelope.
    pub encrypted_metadata: Envelope,
}

/// Gateway session parameters fetched at connect time.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server signing public key (base64url).
    pub server_sig_pk: String,
    /// Domain-separation context bound into transcripts and key derivation.
    pub context: String,
    /// Algorithm suite the server seals with.
    pub algs: AlgorithmSuite,
    /// Maximum inbox lifetime in seconds.
    #[serde(default)]
    pub max_ttl: Option<u64>,
    /// Default inbox lifetime in seconds.
    #[serde(default)]
    pub default_ttl: Option<u64>,
}

/// A decrypted email.
///
/// Read status is only changed by the client's mark-as-read call.
#[derive(Clone, Debug, PartialEq)]
pub struct Email {
    id: String,
    inbox_address: String,
    metadata: EmailMetadata,
    content: Option<ParsedContent>,
    is_read: bool,
}

impl Email {
    /// Assemble an email from already decrypted parts.
    pub fn new(
        id: impl Into<String>,
        inbox_address: impl Into<String>,
        metadata: EmailMetadata,
        content: Option<ParsedContent>,
        is_read: bool,
    ) -> Self {
        Self {
            id: id.into(),
            inbox_address: inbox_address.into(),
            metadata,
            content,
            is_read,
        }
    }

    /// Decrypt a gateway email for `inbox`.
    pub fn open(
        crypto: &dyn EnvelopeDecryptionApi,
        inbox: &Inbox,
        encrypted: &EncryptedEmail,
    ) -> Result<Self, CryptoError> {
        let metadata = crypto.decrypt_metadata(&encrypted.encrypted_metadata, &inbox.keypair)?;
        let content = encrypted
            .encrypted_parsed
            .as_ref()
            .map(|env| crypto.decrypt_parsed(env, &inbox.keypair))
            .transpose()?;
        Ok(Self::new(
            encrypted.id.clone(),
            inbox.email_address.clone(),
            metadata,
            content,
            encrypted.is_read,
        ))
    }

    /// Decrypt a stream notification for `inbox`. Carries metadata only.
    pub fn from_stream(
        crypto: &dyn EnvelopeDecryptionApi,
        inbox: &Inbox,
        message: &StreamMessage,
    ) -> Result<Self, CryptoError> {
        let metadata = crypto.decrypt_metadata(&message.encrypted_metadata, &inbox.keypair)?;
        Ok(Self::new(
            message.email_id.clone(),
            inbox.email_address.clone(),
            metadata,
            None,
            false,
        ))
    }

    /// Email identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Address of the owning inbox.
    pub fn inbox_address(&self) -> &str {
        &self.inbox_address
    }

    /// Decrypted metadata.
    pub fn metadata(&self) -> &EmailMetadata {
        &self.metadata
    }

    /// Decrypted body, when it was fetched.
    pub fn content(&self) -> Option<&ParsedContent> {
        self.content.as_ref()
    }

    /// Whether the email has been marked read.
    pub fn is_read(&self) -> bool {
        self.is_read
    }

    pub(crate) fn mark_read(&mut self) {
        self.is_read = true;
    }
}
