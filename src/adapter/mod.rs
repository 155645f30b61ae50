//! Adapter contract
//!
//! An adapter owns a broker client and implements the queue operations on
//! top of it. Operations an adapter does not support keep their default
//! bodies, which fail with [`QueueError::InvalidAdapter`]; the facade checks
//! [`Adapter::supports`] first so callers get the same error without the
//! adapter being touched.

use crate::config::ConnectionOptions;
use crate::connection::Connection;
use crate::error::{QueueError, QueueResult};
use crate::message::{Delivery, PublishOptions, SubscribeOptions};
use crate::transport::ClientHandle;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod amqp;
pub mod null;

pub use amqp::{AdapterState, AmqpAdapter};
pub use null::NullAdapter;

/// Decoded messages from a subscription
pub type DeliveryStream = BoxStream<'static, QueueResult<Delivery>>;

/// Queue operations an adapter may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Publish,
    Subscribe,
    StayConnected,
    Client,
    Reset,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Publish,
        Operation::Subscribe,
        Operation::StayConnected,
        Operation::Client,
        Operation::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Publish => "publish",
            Operation::Subscribe => "subscribe",
            Operation::StayConnected => "stay_connected",
            Operation::Client => "client",
            Operation::Reset => "reset",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-adapter "keep the connection open" flag
#[derive(Debug, Clone, Default)]
pub struct StayConnectedFlag(Arc<AtomicBool>);

impl StayConnectedFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Force the flag on until the returned guard is dropped
    pub fn enter(&self) -> StayConnectedGuard {
        let previous = self.0.swap(true, Ordering::SeqCst);
        StayConnectedGuard {
            flag: Some(Arc::clone(&self.0)),
            previous,
        }
    }
}

/// Restores the stay-connected flag to its saved value when dropped
#[must_use = "dropping the guard immediately ends the stay-connected scope"]
#[derive(Debug)]
pub struct StayConnectedGuard {
    flag: Option<Arc<AtomicBool>>,
    previous: bool,
}

impl StayConnectedGuard {
    /// A guard bound to no flag, for adapters without connection state
    pub fn detached() -> Self {
        Self {
            flag: None,
            previous: false,
        }
    }

    /// The flag value saved when the scope was entered
    pub fn previous(&self) -> bool {
        self.previous
    }
}

impl Drop for StayConnectedGuard {
    fn drop(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.store(self.previous, Ordering::SeqCst);
        }
    }
}

/// Broker adapter used by the [`Queue`](crate::queue::Queue) facade
#[async_trait]
pub trait Adapter: Send {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Whether this adapter implements `operation`
    fn supports(&self, _operation: Operation) -> bool {
        true
    }

    /// Reject options missing a field this adapter requires
    fn check_connection_details(&self, _options: &ConnectionOptions) -> QueueResult<()> {
        Ok(())
    }

    /// Pack `payload` and send it to `queue_name`
    async fn publish(
        &mut self,
        _connection: &Connection,
        _queue_name: &str,
        _payload: &Value,
        _options: &PublishOptions,
    ) -> QueueResult<()> {
        Err(QueueError::invalid_adapter(Operation::Publish))
    }

    /// Start consuming `queue_name`.
    ///
    /// Callers are expected to hold a stay-connected scope for as long as the
    /// stream is polled.
    async fn subscribe(
        &mut self,
        _connection: &Connection,
        _queue_name: &str,
        _options: &SubscribeOptions,
    ) -> QueueResult<DeliveryStream> {
        Err(QueueError::invalid_adapter(Operation::Subscribe))
    }

    /// Enter a stay-connected scope
    fn begin_stay_connected(&mut self) -> QueueResult<StayConnectedGuard> {
        Err(QueueError::invalid_adapter(Operation::StayConnected))
    }

    /// Leave a stay-connected scope, closing the client if no outer scope
    /// remains
    async fn end_stay_connected(&mut self, guard: StayConnectedGuard) -> QueueResult<()> {
        drop(guard);
        Ok(())
    }

    /// Low-level client handle, built on first use
    fn client(&mut self, _connection: &Connection) -> QueueResult<ClientHandle> {
        Err(QueueError::invalid_adapter(Operation::Client))
    }

    /// Close and forget the client so the next use builds a fresh one
    async fn reset(&mut self) -> QueueResult<()> {
        Err(QueueError::invalid_adapter(Operation::Reset))
    }
}
