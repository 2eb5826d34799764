//! Domain layer: envelope entities, codec, transcript, key derivation, AEAD.

pub mod aead;
pub mod codec;
pub mod entities;
pub mod errors;
pub mod kdf;
pub mod transcript;

pub use codec::{concat, from_base64url, owned, to_base64url, DecodeError};
pub use entities::*;
pub use errors::{CryptoError, Result};
pub use kdf::{derive_key, DerivedKey, DERIVED_KEY_LEN};
pub use transcript::build_transcript;
