//! Base64 text filter

use super::{FilterError, MessageFilter};
use base64::{engine::general_purpose, Engine as _};
use serde_json::Value;

/// Base64-encodes string payloads so the wire text is plain ASCII.
///
/// Place it after [`super::JsonFilter`] to carry structured payloads.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Filter;

fn expect_string(payload: Value) -> Result<String, FilterError> {
    match payload {
        Value::String(text) => Ok(text),
        _ => Err(FilterError::UnexpectedType {
            filter: "base64",
            expected: "string",
        }),
    }
}

impl MessageFilter for Base64Filter {
    fn name(&self) -> &'static str {
        "base64"
    }

    fn pack(&self, payload: Value) -> Result<Value, FilterError> {
        let text = expect_string(payload)?;
        Ok(Value::String(general_purpose::STANDARD.encode(text)))
    }

    fn unpack(&self, payload: Value) -> Result<Value, FilterError> {
        let encoded = expect_string(payload)?;
        let bytes = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| FilterError::Encoding(format!("invalid base64: {e}")))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| FilterError::Encoding(format!("decoded base64 is not UTF-8: {e}")))?;
        Ok(Value::String(text))
    }
}
