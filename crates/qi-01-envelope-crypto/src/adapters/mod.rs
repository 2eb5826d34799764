//! # Adapters
//!
//! Bindings of the outbound primitive ports to concrete libraries.

#[cfg(feature = "pq")]
pub mod pq;

#[cfg(feature = "pq")]
pub use pq::{MlDsa65Verifier, MlKem768Decapsulator};
