//! Delivery strategies: event stream (default) and adaptive polling.

pub mod polling;
pub mod stream;

pub use polling::PollingStrategy;
pub use stream::StreamStrategy;
