//! # QI-02 Inbox Delivery
//!
//! Learns about new emails in ephemeral inboxes and hands them, decrypted,
//! to waiters and subscribers.
//!
//! **Architecture:** Hexagonal (Ports/Adapters)
//!
//! ## Delivery Strategies
//!
//! | Strategy | Transport | Change detection |
//! |----------|-----------|------------------|
//! | Stream (default) | One SSE connection for all subscribed inboxes | Pushed messages routed by inbox hash |
//! | Polling | REST sync endpoint per inbox | Digest comparison with jittered backoff |
//!
//! Both strategies share the subscription registry and resolve waits through
//! the same coordinator: first match, deadline, or fatal error wins, and the
//! subscription is always released.
//!
//! ## Module Structure
//!
//! ```text
//! qi-02-inbox-delivery/
//! ├── domain/          # Inbox, Email, WaitSpec, matchers, errors
//! ├── algorithms/      # Backoff, wait filters, SSE framing
//! ├── ports/           # DeliveryStrategy (inbound), gateway + stream (outbound)
//! ├── registry.rs      # Subscription registry and handles
//! ├── strategies/      # StreamStrategy, PollingStrategy
//! ├── application/     # InboxClient, wait coordinator
//! ├── adapters/        # reqwest REST gateway, SSE connector
//! └── config.rs        # DeliveryConfig
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
pub mod registry;
pub mod strategies;

// Re-exports
pub use adapters::{HttpInboxGateway, SseStreamConnector};
pub use algorithms::{reconnect_delay, PollBackoff, SseDecoder};
pub use application::{InboxClient, InboxClientBuilder};
pub use config::{
    DeliveryConfig, GatewayConfig, PollingConfig, StrategyKind, StreamConfig, WaitConfig,
};
pub use domain::{
    ConfigError, DeliveryError, Email, EmailPredicate, EncryptedEmail, GatewayError, Inbox,
    ServerInfo, StreamMessage, SyncSnapshot, TextMatcher, WaitSpec, DEFAULT_WAIT_TIMEOUT,
};
pub use ports::{
    email_callback, CallbackError, DeliveryStrategy, EmailCallback, InboxGateway, MessageStream,
    StreamConnector,
};
pub use registry::{SubscriptionHandle, SubscriptionId, SubscriptionRegistry};
pub use strategies::{PollingStrategy, StreamStrategy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
