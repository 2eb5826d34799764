//! Application layer: the client facade and the wait coordinator.

pub mod client;
pub mod wait;

pub use client::{InboxClient, InboxClientBuilder};
