//! Pure algorithms: backoff, filtering, event-stream framing.

pub mod backoff;
pub mod filter;
pub mod sse;

pub use backoff::{deadline_after, reconnect_delay, PollBackoff};
pub use sse::SseDecoder;
