use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::EncodingError;
use crate::types::{AttributeValue, KeyType};

/// Render a scalar value as plain text.
///
/// Sets and other kinds have no plain form; the table key may never hold one.
pub fn to_plain(value: &AttributeValue) -> Result<String, EncodingError> {
    match value {
        AttributeValue::S(s) | AttributeValue::N(s) => Ok(s.clone()),
        AttributeValue::B(b) => Ok(STANDARD.encode(b)),
        other => Err(EncodingError::NotScalar(other.type_tag().to_string())),
    }
}

/// Parse plain text as a value of the given key type.
pub fn parse_plain(key_type: KeyType, text: &str) -> Result<AttributeValue, EncodingError> {
    if text.is_empty() {
        return Err(EncodingError::Empty);
    }
    match key_type {
        KeyType::String => Ok(AttributeValue::S(text.to_string())),
        KeyType::Number => validate_number(text).map(AttributeValue::N),
        KeyType::Binary => decode_base64(text).map(AttributeValue::B),
    }
}

/// Check that `text` is a finite decimal number and return it trimmed.
pub(crate) fn validate_number(text: &str) -> Result<String, EncodingError> {
    let trimmed = text.trim();
    match trimmed.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(trimmed.to_string()),
        _ => Err(EncodingError::InvalidNumber(text.to_string())),
    }
}

pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>, EncodingError> {
    STANDARD
        .decode(text.trim())
        .map_err(|_| EncodingError::InvalidBase64(text.to_string()))
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
