//! Observability
//!
//! Structured logging setup and span helpers for queue operations.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};

pub use logging::queue_span;
