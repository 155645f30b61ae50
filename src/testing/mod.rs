//! Testing utilities
//!
//! An in-memory broker for exercising adapters and the queue facade without a
//! running AMQP server.

pub mod mocks;

pub use mocks::*;
