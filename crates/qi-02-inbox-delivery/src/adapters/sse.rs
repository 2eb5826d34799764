//! # Server-Sent Event Stream Connector
//!
//! `StreamConnector` over `GET /api/events?inboxes=h1,h2`.
//!
//! The connection is long-lived, so the client has a connect timeout only.
//! Each event's `data` payload is decoded as a `StreamMessage`; a payload
//! that fails to decode is yielded as `GatewayError::Decode` and the stream
//! stays open.

use super::http_gateway::{send, API_KEY_HEADER};
use crate::algorithms::SseDecoder;
use crate::config::GatewayConfig;
use crate::domain::{GatewayError, StreamMessage};
use crate::ports::outbound::{MessageStream, StreamConnector};
use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use reqwest::{header, Client, Url};
use tracing::debug;

/// SSE connector for the gateway's event endpoint.
#[derive(Clone)]
pub struct SseStreamConnector {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl SseStreamConnector {
    /// Build a connector from `config`.
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| GatewayError::Transport(format!("invalid base URL: {e}")))?;
        let client = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone(),
        })
    }

    fn events_url(&self, routing_hashes: &[String]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "events"]);
        }
        url.query_pairs_mut()
            .append_pair("inboxes", &routing_hashes.join(","));
        url
    }
}

impl std::fmt::Debug for SseStreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseStreamConnector")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamConnector for SseStreamConnector {
    async fn connect(&self, routing_hashes: &[String]) -> Result<MessageStream, GatewayError> {
        let url = self.events_url(routing_hashes);
        debug!(%url, inboxes = routing_hashes.len(), "Opening event stream");

        let response = send(
            self.client
                .get(url)
                .header(API_KEY_HEADER, &self.api_key)
                .header(header::ACCEPT, "text/event-stream"),
        )
        .await?;

        Ok(decode_events(response.bytes_stream()))
    }
}

/// Frame a byte stream into decoded stream messages.
pub(crate) fn decode_events<S, B, E>(bytes: S) -> MessageStream
where
    S: futures::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    bytes
        .scan(SseDecoder::default(), |decoder, chunk| {
            let items: Vec<Result<StreamMessage, GatewayError>> = match chunk {
                Ok(bytes) => decoder
                    .push(bytes.as_ref())
                    .into_iter()
                    .map(|data| parse_event(&data))
                    .collect(),
                Err(e) => vec![Err(GatewayError::Transport(e.to_string()))],
            };
            future::ready(Some(stream::iter(items)))
        })
        .flatten()
        .boxed()
}

fn parse_event(data: &str) -> Result<StreamMessage, GatewayError> {
    serde_json::from_str(data).map_err(|e| GatewayError::Decode(e.to_string()))
}
