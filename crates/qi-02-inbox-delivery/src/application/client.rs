//! # Inbox Client
//!
//! Facade over the gateway, the decryption engine, and the active delivery
//! strategy.
//!
//! ## Connect sequence
//!
//! 1. Validate the configuration
//! 2. Fetch server info (signing key, context string, algorithm suite)
//! 3. Build the crypto context, pinning the advertised server key (which
//!    must equal the configured pin, if any)
//! 4. Start the configured delivery strategy

use super::wait;
use crate::adapters::{HttpInboxGateway, SseStreamConnector};
use crate::config::{DeliveryConfig, StrategyKind};
use crate::domain::{DeliveryError, Email, Inbox, ServerInfo, WaitSpec};
use crate::ports::inbound::{DeliveryStrategy, EmailCallback};
use crate::ports::outbound::{InboxGateway, StreamConnector};
use crate::registry::SubscriptionHandle;
use crate::strategies::{PollingStrategy, StreamStrategy};
use qi_01_envelope_crypto::{
    from_base64url, AlgorithmSuite, CryptoContext, EnvelopeCryptoService, EnvelopeDecryptionApi,
    KemDecapsulator, MlDsa65Verifier, MlKem768Decapsulator, SignaturePrimitive,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Client for one gateway session.
pub struct InboxClient {
    config: DeliveryConfig,
    gateway: Arc<dyn InboxGateway>,
    crypto: Arc<dyn EnvelopeDecryptionApi>,
    strategy: Option<Arc<dyn DeliveryStrategy>>,
    server_info: ServerInfo,
}

impl InboxClient {
    /// Start building a client.
    pub fn builder() -> InboxClientBuilder {
        InboxClientBuilder::default()
    }

    /// Connect to the gateway over HTTP with the post-quantum primitives.
    pub async fn connect_http(config: DeliveryConfig) -> Result<Self, DeliveryError> {
        Self::builder()
            .config(config)
            .build(MlKem768Decapsulator, MlDsa65Verifier)
            .await
    }

    /// Connect using the given ports and primitives.
    ///
    /// `connector` is only used by the stream strategy.
    pub async fn connect<K, S>(
        config: DeliveryConfig,
        gateway: Arc<dyn InboxGateway>,
        connector: Arc<dyn StreamConnector>,
        kem: K,
        signature: S,
    ) -> Result<Self, DeliveryError>
    where
        K: KemDecapsulator + 'static,
        S: SignaturePrimitive + 'static,
    {
        config.validate()?;

        let server_info = gateway.server_info().await?;
        let context = crypto_context(&config, &server_info)?;
        let crypto: Arc<dyn EnvelopeDecryptionApi> =
            Arc::new(EnvelopeCryptoService::new(kem, signature, context));

        let strategy: Arc<dyn DeliveryStrategy> = match config.strategy {
            StrategyKind::Stream => Arc::new(StreamStrategy::new(
                config.stream.clone(),
                connector,
                Arc::clone(&crypto),
            )),
            StrategyKind::Polling => Arc::new(PollingStrategy::new(
                config.polling.clone(),
                Arc::clone(&gateway),
                Arc::clone(&crypto),
            )),
        };

        info!(
            strategy = ?config.strategy,
            context = %server_info.context,
            pinned = config.gateway.pinned_server_key.is_some(),
            "Inbox client connected"
        );

        Ok(Self {
            config,
            gateway,
            crypto,
            strategy: Some(strategy),
            server_info,
        })
    }

    /// Client with no delivery strategy. Every delivery operation fails with
    /// `Configuration`; direct fetches still work.
    pub fn without_strategy(
        config: DeliveryConfig,
        gateway: Arc<dyn InboxGateway>,
        crypto: Arc<dyn EnvelopeDecryptionApi>,
        server_info: ServerInfo,
    ) -> Self {
        Self {
            config,
            gateway,
            crypto,
            strategy: None,
            server_info,
        }
    }

    /// Server parameters fetched at connect time.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Active configuration.
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Wait spec with the configured default timeout.
    pub fn default_wait(&self) -> WaitSpec {
        WaitSpec::new(self.config.wait.default_timeout())
    }

    fn strategy(&self) -> Result<&Arc<dyn DeliveryStrategy>, DeliveryError> {
        self.strategy
            .as_ref()
            .ok_or_else(|| DeliveryError::Configuration("no delivery strategy configured".into()))
    }

    /// Decrypt every email in `inbox` (metadata only).
    pub async fn list_emails(&self, inbox: &Inbox) -> Result<Vec<Email>, DeliveryError> {
        let encrypted = self.gateway.list_emails(&inbox.email_address).await?;
        debug!(inbox = %inbox.routing_hash, count = encrypted.len(), "Listed emails");
        encrypted
            .iter()
            .map(|e| Email::open(self.crypto.as_ref(), inbox, e).map_err(DeliveryError::from))
            .collect()
    }

    /// Fetch and decrypt one email including its body.
    pub async fn get_email(&self, inbox: &Inbox, email_id: &str) -> Result<Email, DeliveryError> {
        let encrypted = self.gateway.get_email(&inbox.email_address, email_id).await?;
        Ok(Email::open(self.crypto.as_ref(), inbox, &encrypted)?)
    }

    /// Fetch and decrypt the raw RFC 5322 message bytes.
    pub async fn get_raw_email(
        &self,
        inbox: &Inbox,
        email_id: &str,
    ) -> Result<Vec<u8>, DeliveryError> {
        let envelope = self
            .gateway
            .get_raw_email(&inbox.email_address, email_id)
            .await?;
        Ok(self.crypto.decrypt_raw(&envelope, &inbox.keypair)?)
    }

    /// Mark `email` read on the gateway, then locally.
    pub async fn mark_email_read(
        &self,
        inbox: &Inbox,
        email: &mut Email,
    ) -> Result<(), DeliveryError> {
        self.gateway
            .mark_read(&inbox.email_address, email.id())
            .await?;
        email.mark_read();
        Ok(())
    }

    /// Wait for the first email matching `spec`.
    pub async fn wait_for_email(
        &self,
        inbox: Arc<Inbox>,
        spec: WaitSpec,
    ) -> Result<Email, DeliveryError> {
        self.strategy()?.wait_for_email(inbox, spec).await
    }

    /// Wait until `inbox` holds at least `count` emails. Returns the count
    /// observed.
    pub async fn wait_for_email_count(
        &self,
        inbox: Arc<Inbox>,
        count: usize,
        timeout: Duration,
    ) -> Result<usize, DeliveryError> {
        let strategy = self.strategy()?;
        let gateway = Arc::clone(&self.gateway);
        let address = inbox.email_address.clone();

        wait::wait_for_count(&**strategy, inbox, count, timeout, move || {
            let gateway = Arc::clone(&gateway);
            let address = address.clone();
            async move {
                let snapshot = gateway.sync_status(&address).await?;
                Ok::<_, DeliveryError>(usize::try_from(snapshot.email_count).unwrap_or(usize::MAX))
            }
        })
        .await
    }

    /// Run `callback` for every new email in `inbox` until the handle is
    /// unsubscribed or dropped.
    pub fn on_new_email(
        &self,
        inbox: Arc<Inbox>,
        callback: EmailCallback,
    ) -> Result<SubscriptionHandle, DeliveryError> {
        self.strategy()?.subscribe(inbox, callback)
    }

    /// Fatal asynchronous failures of the delivery strategy.
    pub fn errors(&self) -> Result<broadcast::Receiver<DeliveryError>, DeliveryError> {
        Ok(self.strategy()?.errors())
    }

    /// Stop delivery. Pending waits resolve with `Closed`.
    pub async fn close(&self) {
        if let Some(strategy) = &self.strategy {
            strategy.close().await;
        }
        info!("Inbox client closed");
    }
}

fn crypto_context(
    config: &DeliveryConfig,
    server_info: &ServerInfo,
) -> Result<CryptoContext, DeliveryError> {
    if server_info.algs != AlgorithmSuite::session_default() {
        return Err(DeliveryError::Configuration(format!(
            "server algorithm suite {} is not supported",
            server_info.algs.ciphersuite()
        )));
    }

    let advertised = from_base64url("server_sig_pk", &server_info.server_sig_pk)
        .map_err(|e| DeliveryError::Configuration(e.to_string()))?;
    if let Some(pinned) = &config.gateway.pinned_server_key {
        let pinned = from_base64url("pinned_server_key", pinned)
            .map_err(|e| DeliveryError::Configuration(e.to_string()))?;
        if pinned != advertised {
            return Err(DeliveryError::Configuration(
                "server signing key does not match the pinned key".into(),
            ));
        }
    }

    Ok(CryptoContext::new(server_info.context.clone()).with_pinned_server_key(advertised))
}

/// Builder for [`InboxClient`].
///
/// Ports left unset default to the HTTP gateway and the SSE connector.
#[derive(Default)]
pub struct InboxClientBuilder {
    config: DeliveryConfig,
    gateway: Option<Arc<dyn InboxGateway>>,
    connector: Option<Arc<dyn StreamConnector>>,
}

impl InboxClientBuilder {
    /// Use `config`.
    pub fn config(mut self, config: DeliveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `gateway` instead of the HTTP gateway.
    pub fn gateway(mut self, gateway: Arc<dyn InboxGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Use `connector` instead of the SSE connector.
    pub fn connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Connect with the given primitives.
    pub async fn build<K, S>(self, kem: K, signature: S) -> Result<InboxClient, DeliveryError>
    where
        K: KemDecapsulator + 'static,
        S: SignaturePrimitive + 'static,
    {
        let gateway: Arc<dyn InboxGateway> = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(HttpInboxGateway::new(&self.config.gateway)?),
        };
        let connector: Arc<dyn StreamConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(SseStreamConnector::new(&self.config.gateway)?),
        };
        InboxClient::connect(self.config, gateway, connector, kem, signature).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qi_01_envelope_crypto::to_base64url;

    fn server_info() -> ServerInfo {
        ServerInfo {
            server_sig_pk: to_base64url(&[7u8; 32]),
            context: "quantum-inbox:email:v1".into(),
            algs: AlgorithmSuite::session_default(),
            max_ttl: None,
            default_ttl: None,
        }
    }

    #[test]
    fn test_context_pins_advertised_key() {
        let context = crypto_context(&DeliveryConfig::for_testing(), &server_info()).unwrap();
        assert_eq!(context.context, "quantum-inbox:email:v1");
        assert_eq!(context.pinned_server_key, Some(vec![7u8; 32]));
    }

    #[test]
    fn test_matching_configured_pin() {
        let mut config = DeliveryConfig::for_testing();
        config.gateway.pinned_server_key = Some(to_base64url(&[7u8; 32]));

        let context = crypto_context(&config, &server_info()).unwrap();
        assert_eq!(context.pinned_server_key, Some(vec![7u8; 32]));
    }

    #[test]
    fn test_configured_pin_must_match_advertised_key() {
        let mut config = DeliveryConfig::for_testing();
        config.gateway.pinned_server_key = Some(to_base64url(&[8u8; 32]));

        let err = crypto_context(&config, &server_info()).unwrap_err();
        assert!(matches!(err, DeliveryError::Configuration(_)));
    }

    #[test]
    fn test_bad_pinned_key_is_configuration_error() {
        let mut config = DeliveryConfig::for_testing();
        config.gateway.pinned_server_key = Some("***".into());

        let err = crypto_context(&config, &server_info()).unwrap_err();
        assert!(matches!(err, DeliveryError::Configuration(_)));
    }

    #[test]
    fn test_bad_advertised_key_is_configuration_error() {
        let mut info = server_info();
        info.server_sig_pk = "***".into();

        let err = crypto_context(&DeliveryConfig::for_testing(), &info).unwrap_err();
        assert!(matches!(err, DeliveryError::Configuration(m) if m.contains("server_sig_pk")));
    }

    #[test]
    fn test_unsupported_suite_is_rejected() {
        let mut info = server_info();
        info.algs.kem = "X25519".into();

        let err = crypto_context(&DeliveryConfig::for_testing(), &info).unwrap_err();
        assert!(matches!(err, DeliveryError::Configuration(m) if m.contains("X25519")));
    }
}
