//! Shared-secret signing filter
//!
//! Wraps each payload as `{"secret": <signature>, "msg": <payload>}` where the
//! signature is the hex SHA-256 of the secret followed by the payload's JSON
//! text. Receivers holding the same secret reject anything that does not
//! verify.

use super::{FilterError, MessageFilter};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

const SIGNATURE_KEY: &str = "secret";
const MESSAGE_KEY: &str = "msg";

/// Signs outbound payloads and verifies inbound ones
#[derive(Clone)]
pub struct SharedSecretFilter {
    secret: String,
}

impl SharedSecretFilter {
    pub fn new<S: Into<String>>(secret: S) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn sign(&self, payload: &Value) -> Result<String, FilterError> {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(serde_json::to_string(payload)?.as_bytes());
        Ok(format!("{:x}", hasher.finalize()))
    }
}

impl std::fmt::Debug for SharedSecretFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretFilter")
            .field("secret", &"***")
            .finish()
    }
}

impl MessageFilter for SharedSecretFilter {
    fn name(&self) -> &'static str {
        "shared_secret"
    }

    fn pack(&self, payload: Value) -> Result<Value, FilterError> {
        let signature = self.sign(&payload)?;
        Ok(json!({ "secret": signature, "msg": payload }))
    }

    fn unpack(&self, payload: Value) -> Result<Value, FilterError> {
        let Value::Object(mut envelope) = payload else {
            return Err(FilterError::UnexpectedType {
                filter: "shared_secret",
                expected: "object",
            });
        };

        let signature = match envelope.remove(SIGNATURE_KEY) {
            Some(Value::String(signature)) => signature,
            _ => return Err(FilterError::Malformed("missing message signature".to_string())),
        };
        let message = envelope
            .remove(MESSAGE_KEY)
            .ok_or_else(|| FilterError::Malformed("missing signed message".to_string()))?;

        if self.sign(&message)? != signature {
            return Err(FilterError::InvalidSignature);
        }
        Ok(message)
    }
}
