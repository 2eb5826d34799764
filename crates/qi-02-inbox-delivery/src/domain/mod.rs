//! Domain layer: entities, errors, matchers, wait specifications.

pub mod entities;
pub mod errors;
pub mod matcher;
pub mod wait_spec;

pub use entities::*;
pub use errors::{ConfigError, DeliveryError, GatewayError, Result};
pub use matcher::TextMatcher;
pub use wait_spec::{EmailPredicate, WaitSpec, DEFAULT_WAIT_TIMEOUT};
