//! # Outbound Ports
//!
//! Gateway REST calls and the authenticated event-stream connection.

use crate::domain::{EncryptedEmail, GatewayError, ServerInfo, StreamMessage, SyncSnapshot};
use async_trait::async_trait;
use futures::stream::BoxStream;
use qi_01_envelope_crypto::Envelope;

/// Stream of pushed messages. A yielded `Err` other than `Decode`, or the
/// end of the stream, means the connection is gone.
pub type MessageStream = BoxStream<'static, Result<StreamMessage, GatewayError>>;

/// Inbox gateway - outbound port.
#[async_trait]
pub trait InboxGateway: Send + Sync {
    /// Session parameters: signing key, context string, algorithm suite.
    async fn server_info(&self) -> Result<ServerInfo, GatewayError>;

    /// Change-detection digest of an inbox.
    async fn sync_status(&self, email_address: &str) -> Result<SyncSnapshot, GatewayError>;

    /// All emails in an inbox (metadata envelopes).
    async fn list_emails(&self, email_address: &str) -> Result<Vec<EncryptedEmail>, GatewayError>;

    /// One email including its parsed body envelope.
    async fn get_email(
        &self,
        email_address: &str,
        email_id: &str,
    ) -> Result<EncryptedEmail, GatewayError>;

    /// Envelope holding the base64 raw message.
    async fn get_raw_email(
        &self,
        email_address: &str,
        email_id: &str,
    ) -> Result<Envelope, GatewayError>;

    /// Mark an email read on the gateway.
    async fn mark_read(&self, email_address: &str, email_id: &str) -> Result<(), GatewayError>;
}

/// Event stream connection - outbound port.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open one stream carrying events for every routing hash given.
    async fn connect(&self, routing_hashes: &[String]) -> Result<MessageStream, GatewayError>;
}
