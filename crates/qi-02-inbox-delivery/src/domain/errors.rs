//! # Delivery Errors
//!
//! Error types for delivery, waits, the gateway port, and configuration.

use qi_01_envelope_crypto::CryptoError;
use thiserror::Error;

/// Errors from the gateway port.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The inbox or email no longer exists (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The API key was rejected.
    #[error("Unauthorized")]
    Unauthorized,

    /// Any other non-success status.
    #[error("Gateway returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Connection or I/O failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether retrying the same request cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Unauthorized)
    }
}

/// Errors surfaced by delivery strategies, waits, and the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Server signature over the envelope did not verify.
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Envelope could not be decrypted or parsed.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// The wait deadline passed without a qualifying email.
    #[error("Timed out after {timeout_ms}ms waiting for email")]
    Timeout {
        /// Wait timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The inbox or email no longer exists on the gateway.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Stream reconnection attempts were exhausted.
    #[error("Event stream gave up after {attempts} reconnection attempts")]
    StreamExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// No delivery strategy configured, or an invalid setup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Gateway failure other than not-found.
    #[error(transparent)]
    Gateway(GatewayError),

    /// The client or strategy was closed.
    #[error("Delivery closed")]
    Closed,
}

impl DeliveryError {
    /// Timeout for a wait of `timeout`.
    pub fn timeout(timeout: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<CryptoError> for DeliveryError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::SignatureInvalid(m) => Self::SignatureInvalid(m),
            CryptoError::DecryptionFailed(m) => Self::DecryptionFailed(m),
        }
    }
}

impl From<GatewayError> for DeliveryError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::NotFound(what) => Self::ResourceNotFound(what),
            other => Self::Gateway(other),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// A field holds an unusable value.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// An environment variable could not be parsed.
    #[error("environment variable {var}: {reason}")]
    Environment {
        /// Variable name.
        var: &'static str,
        /// Parse failure.
        reason: String,
    },
}

impl From<ConfigError> for DeliveryError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

/// Result type for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_not_found_maps_to_resource_not_found() {
        let err: DeliveryError = GatewayError::NotFound("inbox a@x.test".into()).into();
        assert_eq!(err, DeliveryError::ResourceNotFound("inbox a@x.test".into()));
    }

    #[test]
    fn test_other_gateway_errors_wrap() {
        let err: DeliveryError = GatewayError::Transport("reset".into()).into();
        assert!(matches!(err, DeliveryError::Gateway(GatewayError::Transport(_))));
    }

    #[test]
    fn test_crypto_errors_stay_distinct() {
        let sig: DeliveryError = CryptoError::signature("bad").into();
        let dec: DeliveryError = CryptoError::decryption("tag").into();
        assert!(matches!(sig, DeliveryError::SignatureInvalid(_)));
        assert!(matches!(dec, DeliveryError::DecryptionFailed(_)));
    }

    #[test]
    fn test_timeout_message() {
        let err = DeliveryError::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Timed out after 1500ms waiting for email");
    }

    #[test]
    fn test_permanent_gateway_errors() {
        assert!(GatewayError::Unauthorized.is_permanent());
        assert!(!GatewayError::Transport("x".into()).is_permanent());
    }
}
