//! JSON encoding filter

use super::{FilterError, MessageFilter};
use serde_json::Value;

/// Serialises any payload to JSON text and parses it back
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFilter;

impl MessageFilter for JsonFilter {
    fn name(&self) -> &'static str {
        "json"
    }

    fn pack(&self, payload: Value) -> Result<Value, FilterError> {
        Ok(Value::String(serde_json::to_string(&payload)?))
    }

    fn unpack(&self, payload: Value) -> Result<Value, FilterError> {
        match payload {
            Value::String(text) => Ok(serde_json::from_str(&text)?),
            _ => Err(FilterError::UnexpectedType {
                filter: "json",
                expected: "string",
            }),
        }
    }
}
