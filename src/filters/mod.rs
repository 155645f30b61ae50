//! Message filter pipeline
//!
//! Filters are reversible payload transforms. On publish the pipeline runs
//! each filter's `pack` in order; on receive it runs `unpack` in reverse
//! order, so `unpack(pack(p)) == p` for any payload the filters accept.
//!
//! The wire form is text: if the last filter produces a `Value::String` its
//! contents are sent as-is, any other value is serialised as JSON. Inbound
//! bytes enter the reverse pass as a `Value::String`.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod base64;
pub mod json;
pub mod shared_secret;

pub use self::base64::Base64Filter;
pub use json::JsonFilter;
pub use shared_secret::SharedSecretFilter;

/// Errors raised while packing or unpacking a message
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("JSON serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Invalid message encoding: {0}")]
    Encoding(String),
    #[error("{filter} filter expected a {expected} value")]
    UnexpectedType {
        filter: &'static str,
        expected: &'static str,
    },
    #[error("Malformed message: {0}")]
    Malformed(String),
    #[error("Message signature does not match")]
    InvalidSignature,
}

/// A reversible payload transform
pub trait MessageFilter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Outbound transform
    fn pack(&self, payload: Value) -> Result<Value, FilterError>;

    /// Inbound transform, the inverse of [`MessageFilter::pack`]
    fn unpack(&self, payload: Value) -> Result<Value, FilterError>;
}

/// Ordered list of filters applied to every message
#[derive(Clone)]
pub struct MessageFilterPipeline {
    filters: Vec<Arc<dyn MessageFilter>>,
}

impl MessageFilterPipeline {
    pub fn new(filters: Vec<Arc<dyn MessageFilter>>) -> Self {
        Self { filters }
    }

    /// A pipeline with no filters; only string payloads round-trip through it
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Append a filter, returning the extended pipeline
    pub fn with_filter<F: MessageFilter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn filter_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|filter| filter.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Encode a caller payload into wire text
    pub fn pack(&self, payload: &Value) -> Result<String, FilterError> {
        let packed = self
            .filters
            .iter()
            .try_fold(payload.clone(), |value, filter| filter.pack(value))?;

        match packed {
            Value::String(text) => Ok(text),
            other => Ok(serde_json::to_string(&other)?),
        }
    }

    /// Decode wire bytes back into the caller payload
    pub fn unpack(&self, wire: &[u8]) -> Result<Value, FilterError> {
        let text = std::str::from_utf8(wire)
            .map_err(|e| FilterError::Encoding(format!("message body is not UTF-8: {e}")))?;

        self.filters
            .iter()
            .rev()
            .try_fold(Value::String(text.to_string()), |value, filter| {
                filter.unpack(value)
            })
    }
}

impl Default for MessageFilterPipeline {
    /// JSON encoding only
    fn default() -> Self {
        Self::empty().with_filter(JsonFilter)
    }
}

impl fmt::Debug for MessageFilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFilterPipeline")
            .field("filters", &self.filter_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Uppercases strings; lowercases on the way back
    struct Shout;

    impl MessageFilter for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }

        fn pack(&self, payload: Value) -> Result<Value, FilterError> {
            match payload {
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                _ => Err(FilterError::UnexpectedType {
                    filter: "shout",
                    expected: "string",
                }),
            }
        }

        fn unpack(&self, payload: Value) -> Result<Value, FilterError> {
            match payload {
                Value::String(s) => Ok(Value::String(s.to_lowercase())),
                _ => Err(FilterError::UnexpectedType {
                    filter: "shout",
                    expected: "string",
                }),
            }
        }
    }

    #[test]
    fn test_default_pipeline_is_json() {
        let pipeline = MessageFilterPipeline::default();
        assert_eq!(pipeline.filter_names(), vec!["json"]);

        let wire = pipeline.pack(&json!({"foo": "bar"})).unwrap();
        assert_eq!(wire, r#"{"foo":"bar"}"#);
        assert_eq!(pipeline.unpack(wire.as_bytes()).unwrap(), json!({"foo": "bar"}));
    }

    #[test]
    fn test_empty_pipeline_passes_strings_through() {
        let pipeline = MessageFilterPipeline::empty();
        assert!(pipeline.is_empty());

        let wire = pipeline.pack(&json!("hello")).unwrap();
        assert_eq!(wire, "hello");
        assert_eq!(pipeline.unpack(b"hello").unwrap(), json!("hello"));
    }

    #[test]
    fn test_empty_pipeline_serializes_non_strings() {
        let pipeline = MessageFilterPipeline::empty();
        assert_eq!(pipeline.pack(&json!([1, 2])).unwrap(), "[1,2]");
    }

    #[test]
    fn test_filters_are_order_sensitive() {
        // shout runs on the JSON text, so keys are uppercased on the wire
        let json_then_shout = MessageFilterPipeline::empty()
            .with_filter(JsonFilter)
            .with_filter(Shout);
        let wire = json_then_shout.pack(&json!({"a": "b"})).unwrap();
        assert_eq!(wire, r#"{"A":"B"}"#);

        // shout first rejects an object payload
        let shout_then_json = MessageFilterPipeline::empty()
            .with_filter(Shout)
            .with_filter(JsonFilter);
        assert!(matches!(
            shout_then_json.pack(&json!({"a": "b"})),
            Err(FilterError::UnexpectedType { filter: "shout", .. })
        ));
    }

    #[test]
    fn test_unpack_runs_in_reverse() {
        let pipeline = MessageFilterPipeline::empty()
            .with_filter(Shout)
            .with_filter(JsonFilter);

        let wire = pipeline.pack(&json!("hi")).unwrap();
        assert_eq!(wire, r#""HI""#);
        assert_eq!(pipeline.unpack(wire.as_bytes()).unwrap(), json!("hi"));
    }

    #[test]
    fn test_unpack_rejects_invalid_utf8() {
        let pipeline = MessageFilterPipeline::default();
        let result = pipeline.unpack(&[0xff, 0xfe]);
        assert!(matches!(result, Err(FilterError::Encoding(_))));
    }

    #[test]
    fn test_debug_lists_filter_names() {
        let pipeline = MessageFilterPipeline::default().with_filter(Base64Filter);
        let debug = format!("{pipeline:?}");
        assert!(debug.contains("json"));
        assert!(debug.contains("base64"));
    }
}
