//! Key string encoding.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Renders a key as a compact JSON string.
///
/// # Errors
///
/// Returns `InvalidKeyString` if the key cannot be serialized, for example
/// a map with non-string keys.
pub fn to_key_string<T: Serialize + ?Sized>(key: &T) -> CodecResult<String> {
    serde_json::to_string(key).map_err(|e| CodecError::invalid_key_string("", e.to_string()))
}

/// Parses a key from its JSON key string.
///
/// # Errors
///
/// Returns `InvalidKeyString` if the string is not valid JSON for `T`.
pub fn from_key_string<T: DeserializeOwned>(s: &str) -> CodecResult<T> {
    serde_json::from_str(s).map_err(|e| CodecError::invalid_key_string(s, e.to_string()))
}
