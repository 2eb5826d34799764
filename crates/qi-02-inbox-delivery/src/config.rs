//! # Delivery Configuration
//!
//! Configuration for the inbox client and its delivery strategies.
//!
//! Environment overrides (`DeliveryConfig::from_env`):
//! - `QI_GATEWAY_URL`, `QI_API_KEY`
//! - `QI_STRATEGY` (`stream` | `polling`)
//! - `QI_POLL_INTERVAL_MS`, `QI_MAX_RECONNECT_ATTEMPTS`

use crate::domain::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// How new emails are discovered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// One multiplexed event stream for all subscribed inboxes.
    #[default]
    Stream,
    /// Digest polling per inbox.
    Polling,
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" | "sse" => Ok(Self::Stream),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(ConfigError::InvalidValue {
                field: "strategy",
                reason: format!("unknown strategy `{other}`"),
            }),
        }
    }
}

/// Adaptive polling parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    /// Base interval between digest checks.
    pub initial_interval_ms: u64,
    /// Growth factor on unchanged digests.
    pub backoff_multiplier: f64,
    /// Interval cap.
    pub max_backoff_ms: u64,
    /// Jitter as a fraction of the interval, in `[0, 1]`.
    pub jitter_factor: f64,
    /// Fixed interval for background subscriptions.
    pub subscription_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2000,
            backoff_multiplier: 1.5,
            max_backoff_ms: 30_000,
            jitter_factor: 0.3,
            subscription_interval_ms: 2000,
        }
    }
}

impl PollingConfig {
    /// Base interval as a duration.
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    /// Interval cap as a duration.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Subscription interval as a duration.
    pub fn subscription_interval(&self) -> Duration {
        Duration::from_millis(self.subscription_interval_ms)
    }
}

/// Event stream reconnection parameters.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Delay before the first reconnect.
    pub reconnect_interval_ms: u64,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Attempts before the stream is declared exhausted.
    pub max_reconnect_attempts: u32,
    /// Capacity of the fatal-error broadcast channel.
    pub error_channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 5000,
            backoff_multiplier: 2.0,
            max_reconnect_attempts: 10,
            error_channel_capacity: 16,
        }
    }
}

impl StreamConfig {
    /// Base reconnect delay as a duration.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Wait defaults.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WaitConfig {
    /// Timeout applied by `WaitSpec::default`-style callers.
    pub default_timeout_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

impl WaitConfig {
    /// Default timeout as a duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// Gateway endpoint and credentials.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL, e.g. `https://inbox.example.com`.
    pub base_url: String,
    /// API key sent in `X-API-Key`.
    pub api_key: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Expected server signing key (base64url). Unset trusts the key the
    /// server advertises at connect time.
    pub pinned_server_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9999".to_string(),
            api_key: String::new(),
            request_timeout_secs: 30,
            pinned_server_key: None,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("pinned_server_key", &self.pinned_server_key)
            .finish()
    }
}

impl GatewayConfig {
    /// Request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Top-level client configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Active delivery strategy.
    pub strategy: StrategyKind,
    /// Polling parameters.
    pub polling: PollingConfig,
    /// Stream parameters.
    pub stream: StreamConfig,
    /// Wait defaults.
    pub wait: WaitConfig,
    /// Gateway endpoint.
    pub gateway: GatewayConfig,
}

impl DeliveryConfig {
    /// Create a config for testing (short intervals, few attempts).
    pub fn for_testing() -> Self {
        Self {
            strategy: StrategyKind::Stream,
            polling: PollingConfig {
                initial_interval_ms: 20,
                backoff_multiplier: 1.5,
                max_backoff_ms: 200,
                jitter_factor: 0.0,
                subscription_interval_ms: 20,
            },
            stream: StreamConfig {
                reconnect_interval_ms: 10,
                backoff_multiplier: 2.0,
                max_reconnect_attempts: 3,
                error_channel_capacity: 16,
            },
            wait: WaitConfig {
                default_timeout_ms: 1000,
            },
            gateway: GatewayConfig {
                base_url: "http://127.0.0.1:9999".to_string(),
                api_key: "test-key".to_string(),
                request_timeout_secs: 5,
                pinned_server_key: None,
            },
        }
    }

    /// Defaults overlaid with `QI_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(url) = env::var("QI_GATEWAY_URL") {
            config.gateway.base_url = url;
        }
        if let Ok(key) = env::var("QI_API_KEY") {
            config.gateway.api_key = key;
        }
        if let Ok(strategy) = env::var("QI_STRATEGY") {
            config.strategy = strategy.parse()?;
        }
        if let Ok(ms) = env::var("QI_POLL_INTERVAL_MS") {
            config.polling.initial_interval_ms = parse_env("QI_POLL_INTERVAL_MS", &ms)?;
        }
        if let Ok(n) = env::var("QI_MAX_RECONNECT_ATTEMPTS") {
            config.stream.max_reconnect_attempts = parse_env("QI_MAX_RECONNECT_ATTEMPTS", &n)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            })
        };

        if self.gateway.base_url.trim().is_empty() {
            return invalid("gateway.base_url", "must not be empty");
        }
        if self.polling.initial_interval_ms == 0 {
            return invalid("polling.initial_interval_ms", "must be positive");
        }
        if self.polling.subscription_interval_ms == 0 {
            return invalid("polling.subscription_interval_ms", "must be positive");
        }
        if self.polling.max_backoff_ms < self.polling.initial_interval_ms {
            return invalid("polling.max_backoff_ms", "must be at least the initial interval");
        }
        if self.polling.backoff_multiplier.is_nan() || self.polling.backoff_multiplier < 1.0 {
            return invalid("polling.backoff_multiplier", "must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.polling.jitter_factor) {
            return invalid("polling.jitter_factor", "must be within [0, 1]");
        }
        if self.stream.reconnect_interval_ms == 0 {
            return invalid("stream.reconnect_interval_ms", "must be positive");
        }
        if self.stream.backoff_multiplier.is_nan() || self.stream.backoff_multiplier < 1.0 {
            return invalid("stream.backoff_multiplier", "must be >= 1");
        }
        if self.stream.error_channel_capacity == 0 {
            return invalid("stream.error_channel_capacity", "must be positive");
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Environment {
        var,
        reason: e.to_string(),
    })
}
