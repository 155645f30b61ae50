//! Error types for queue operations
//!
//! Every failure surfaced by the facade, the adapters and the filter pipeline
//! is a [`QueueError`]. Broker errors are carried untouched as the source of
//! [`QueueError::Transport`]; nothing in this crate retries them.

use crate::adapter::Operation;
use crate::config::ConfigError;
use crate::filters::FilterError;
use thiserror::Error;

/// Error raised by a broker client implementation.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    /// A required connection field is missing or failed adapter validation
    #[error("{0}")]
    InvalidConnectionDetails(String),

    /// No connection options have been set on the queue yet
    #[error("No connection details have been set")]
    NoConnectionDetails,

    /// An operation was invoked before any adapter was registered
    #[error("No adapter has been set")]
    NoAdapterSet,

    /// The active adapter does not implement the requested operation
    #[error("{operation} method missing")]
    InvalidAdapter { operation: Operation },

    /// A subscription was started without a message handler
    #[error("A message handler is required but none was given")]
    NoBlockGiven,

    #[error("Message filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl QueueError {
    /// Create invalid connection details error
    pub fn invalid_connection_details<S: Into<String>>(message: S) -> Self {
        Self::InvalidConnectionDetails(message.into())
    }

    /// Create invalid adapter error for a missing operation
    pub fn invalid_adapter(operation: Operation) -> Self {
        Self::InvalidAdapter { operation }
    }

    /// Create a transport error from any broker client error
    pub fn transport<E>(error: E) -> Self
    where
        E: Into<TransportError>,
    {
        Self::Transport(error.into())
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
