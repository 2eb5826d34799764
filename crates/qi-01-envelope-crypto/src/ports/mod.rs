//! # Ports Module
//!
//! Hexagonal architecture ports (inbound API, outbound primitives).

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
