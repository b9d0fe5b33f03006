//! Miscellaneous helper utilities.
use base64::Engine;

use crate::error::Result;

/// Encode an opaque buffer for transmission to the security service.
#[must_use]
pub fn encode_buffer(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Decode a base64 license payload returned by the security service.
///
/// Surrounding whitespace is ignored; an empty string decodes to an empty
/// buffer.
pub fn decode_license(encoded: &str) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::STANDARD.decode(encoded.trim())?)
}
