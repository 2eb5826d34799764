//! # Codec
//!
//! Byte/string conversions used by the envelope wire format.
//!
//! Every buffer handed to a primitive is an independently owned `Vec<u8>`,
//! never a view into a larger allocation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Error raised when a base64url field cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid base64url in field `{field}`: {reason}")]
pub struct DecodeError {
    /// Name of the field that failed to decode.
    pub field: &'static str,
    /// Decoder message.
    pub reason: String,
}

/// Encode bytes as unpadded base64url.
pub fn to_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a base64url string. Trailing `=` padding is tolerated.
pub fn from_base64url(field: &'static str, value: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = value.trim().trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| DecodeError {
            field,
            reason: e.to_string(),
        })
}

/// Concatenate buffers into one freshly allocated buffer.
pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    let total = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Copy a borrowed slice into an owned, exactly-sized buffer.
pub fn owned(bytes: &[u8]) -> Vec<u8> {
    bytes.to_vec()
}
