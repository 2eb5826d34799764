//! # HTTP Inbox Gateway
//!
//! `InboxGateway` over the gateway's REST API using `reqwest`.
//!
//! Every request carries the API key in `X-API-Key`. Path segments are
//! percent-encoded, so addresses containing `@` or `+` are safe.

use crate::config::GatewayConfig;
use crate::domain::{EncryptedEmail, GatewayError, ServerInfo, SyncSnapshot};
use crate::ports::outbound::InboxGateway;
use async_trait::async_trait;
use qi_01_envelope_crypto::Envelope;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Raw-message response body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEmailResponse {
    #[allow(dead_code)]
    id: String,
    encrypted_raw: Envelope,
}

/// REST gateway client.
#[derive(Clone)]
pub struct HttpInboxGateway {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl HttpInboxGateway {
    /// Build a gateway client from `config`.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::Transport(format!("invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::Transport(format!(
                "invalid base URL: {}",
                config.base_url
            )));
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    /// Base URL of the gateway.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `base_url` joined with percent-encoded `segments`.
    pub(crate) fn url(&self, segments: &[&str]) -> Url {
        endpoint(&self.base_url, segments)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key)
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, GatewayError> {
        let url = self.url(segments);
        debug!(%url, "GET");
        let response = send(self.request(Method::GET, url)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

impl std::fmt::Debug for HttpInboxGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpInboxGateway")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl InboxGateway for HttpInboxGateway {
    async fn server_info(&self) -> Result<ServerInfo, GatewayError> {
        self.get_json(&["api", "server-info"]).await
    }

    async fn sync_status(&self, email_address: &str) -> Result<SyncSnapshot, GatewayError> {
        self.get_json(&["api", "inboxes", email_address, "sync"]).await
    }

    async fn list_emails(&self, email_address: &str) -> Result<Vec<EncryptedEmail>, GatewayError> {
        self.get_json(&["api", "inboxes", email_address, "emails"]).await
    }

    async fn get_email(
        &self,
        email_address: &str,
        email_id: &str,
    ) -> Result<EncryptedEmail, GatewayError> {
        self.get_json(&["api", "inboxes", email_address, "emails", email_id])
            .await
    }

    async fn get_raw_email(
        &self,
        email_address: &str,
        email_id: &str,
    ) -> Result<Envelope, GatewayError> {
        let raw: RawEmailResponse = self
            .get_json(&["api", "inboxes", email_address, "emails", email_id, "raw"])
            .await?;
        Ok(raw.encrypted_raw)
    }

    async fn mark_read(&self, email_address: &str, email_id: &str) -> Result<(), GatewayError> {
        let url = self.url(&["api", "inboxes", email_address, "emails", email_id, "read"]);
        debug!(%url, "PATCH");
        send(self.request(Method::PATCH, url)).await?;
        Ok(())
    }
}

/// `base` joined with percent-encoded `segments`.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Send `request`, mapping failures and non-success statuses.
pub(crate) async fn send(request: RequestBuilder) -> Result<Response, GatewayError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::Transport(format!("request timed out: {e}"))
        } else {
            GatewayError::Transport(e.to_string())
        }
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let path = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, path, body))
}

fn status_error(status: StatusCode, path: String, body: String) -> GatewayError {
    match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(path),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayError::Unauthorized,
        other => {
            warn!(status = other.as_u16(), %path, "Gateway request failed");
            GatewayError::Status {
                status: other.as_u16(),
                message: if body.is_empty() {
                    other.canonical_reason().unwrap_or("unknown").to_string()
                } else {
                    body
                },
            }
        }
    }
}
