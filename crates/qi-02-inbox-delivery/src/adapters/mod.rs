//! Outbound adapters: REST gateway and SSE event stream over `reqwest`.

pub mod http_gateway;
pub mod sse;

pub use http_gateway::HttpInboxGateway;
pub use sse::SseStreamConnector;
