//! Queue facade
//!
//! A [`Queue`] holds the active adapter and the active connection and
//! forwards every operation to the adapter after checking that one is set and
//! that it implements the operation.
//!
//! ```no_run
//! use hutch::{AmqpAdapter, ConnectionOptions, Queue, QueueError};
//! use serde_json::json;
//!
//! # async fn run() -> hutch::QueueResult<()> {
//! let mut queue = Queue::with_adapter(AmqpAdapter::new());
//! queue.set_connection(ConnectionOptions {
//!     user: Some("guest".into()),
//!     pass: Some("guest".into()),
//!     vhost: Some("/".into()),
//!     ..Default::default()
//! })?;
//!
//! queue
//!     .stay_connected(|queue| Box::pin(async move {
//!         for n in 0..3 {
//!             queue.publish("jobs", &json!({ "n": n })).await?;
//!         }
//!         Ok::<(), QueueError>(())
//!     }))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::adapter::{Adapter, Operation, StayConnectedGuard};
use crate::config::ConnectionOptions;
use crate::connection::Connection;
use crate::error::{QueueError, QueueResult};
use crate::message::{Delivery, Metadata, PublishOptions, SubscribeOptions};
use crate::queue_span;
use crate::transport::ClientHandle;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, Instrument};

type PayloadHandler =
    Box<dyn for<'a> FnMut(&'a mut Queue, Value) -> BoxFuture<'a, QueueResult<()>> + Send>;

type MetadataHandler = Box<
    dyn for<'a> FnMut(&'a mut Queue, Value, Metadata) -> BoxFuture<'a, QueueResult<()>> + Send,
>;

/// Message handler registered on a [`Subscription`]
enum Handler {
    Payload(PayloadHandler),
    WithMetadata(MetadataHandler),
}

impl Handler {
    fn call<'q>(&mut self, queue: &'q mut Queue, delivery: Delivery) -> BoxFuture<'q, QueueResult<()>> {
        match self {
            Handler::Payload(handler) => handler(queue, delivery.payload),
            Handler::WithMetadata(handler) => handler(queue, delivery.payload, delivery.metadata),
        }
    }
}

/// Explicit queue context: one adapter, one connection
#[derive(Default)]
pub struct Queue {
    adapter: Option<Box<dyn Adapter>>,
    connection: Option<Connection>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapter<A: Adapter + 'static>(adapter: A) -> Self {
        let mut queue = Self::new();
        queue.set_adapter(adapter);
        queue
    }

    /// Register the active adapter, replacing any previous one
    pub fn set_adapter<A: Adapter + 'static>(&mut self, adapter: A) {
        debug!(adapter = adapter.name(), "Adapter set");
        self.adapter = Some(Box::new(adapter));
    }

    pub fn has_adapter(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn adapter_name(&self) -> Option<&'static str> {
        self.adapter.as_ref().map(|adapter| adapter.name())
    }

    /// Validate `options` with the active adapter and make them current
    pub fn set_connection(&mut self, options: ConnectionOptions) -> QueueResult<()> {
        let adapter = self.adapter.as_deref().ok_or(QueueError::NoAdapterSet)?;
        self.connection = Some(Connection::new(options, adapter)?);
        Ok(())
    }

    /// Make an already validated connection current
    pub fn set_validated_connection(&mut self, connection: Connection) {
        self.connection = Some(connection);
    }

    /// Load connection options for `environment` from a TOML file
    pub fn load_connection(&mut self, path: &Path, environment: &str) -> QueueResult<()> {
        let adapter = self.adapter.as_deref().ok_or(QueueError::NoAdapterSet)?;
        self.connection = Some(Connection::from_config_file(path, environment, adapter)?);
        Ok(())
    }

    pub fn connection(&self) -> QueueResult<&Connection> {
        self.connection.as_ref().ok_or(QueueError::NoConnectionDetails)
    }

    fn adapter_for(&mut self, operation: Operation) -> QueueResult<&mut (dyn Adapter + 'static)> {
        let adapter = self
            .adapter
            .as_deref_mut()
            .ok_or(QueueError::NoAdapterSet)?;
        if !adapter.supports(operation) {
            return Err(QueueError::invalid_adapter(operation));
        }
        Ok(adapter)
    }

    fn parts(
        &mut self,
        operation: Operation,
    ) -> QueueResult<(&mut (dyn Adapter + 'static), &Connection)> {
        let adapter = self
            .adapter
            .as_deref_mut()
            .ok_or(QueueError::NoAdapterSet)?;
        if !adapter.supports(operation) {
            return Err(QueueError::invalid_adapter(operation));
        }
        let connection = self
            .connection
            .as_ref()
            .ok_or(QueueError::NoConnectionDetails)?;
        Ok((adapter, connection))
    }

    /// Publish `payload` to `queue_name`; `"default"` names the configured
    /// default queue. Returns `true` once the message is sent.
    pub async fn publish(&mut self, queue_name: &str, payload: &Value) -> QueueResult<bool> {
        self.publish_with(queue_name, payload, &PublishOptions::default())
            .await
    }

    pub async fn publish_with(
        &mut self,
        queue_name: &str,
        payload: &Value,
        options: &PublishOptions,
    ) -> QueueResult<bool> {
        let (adapter, connection) = self.parts(Operation::Publish)?;
        adapter
            .publish(connection, queue_name, payload, options)
            .instrument(queue_span!(operation = "publish", queue = queue_name))
            .await?;
        Ok(true)
    }

    /// Publish, then run `callback` and return its value
    pub async fn publish_then<T, F>(
        &mut self,
        queue_name: &str,
        payload: &Value,
        callback: F,
    ) -> QueueResult<T>
    where
        F: FnOnce() -> T,
    {
        self.publish(queue_name, payload).await?;
        Ok(callback())
    }

    /// Start building a subscription to `queue_name`
    pub fn subscribe(&mut self, queue_name: &str) -> Subscription<'_> {
        Subscription {
            queue: self,
            queue_name: queue_name.to_string(),
            options: SubscribeOptions::default(),
            handler: None,
        }
    }

    /// Run `block` with the connection held open across every operation it
    /// performs. Scopes nest; only leaving the outermost one closes the
    /// client. Cleanup runs even if `block` fails or panics.
    pub async fn stay_connected<F, T>(&mut self, block: F) -> QueueResult<T>
    where
        F: for<'a> FnOnce(&'a mut Queue) -> BoxFuture<'a, QueueResult<T>>,
    {
        let guard = self
            .adapter_for(Operation::StayConnected)?
            .begin_stay_connected()?;
        self.scoped(guard, block).await
    }

    async fn scoped<F, T>(&mut self, guard: StayConnectedGuard, block: F) -> QueueResult<T>
    where
        F: for<'a> FnOnce(&'a mut Queue) -> BoxFuture<'a, QueueResult<T>>,
    {
        let outcome = AssertUnwindSafe(block(&mut *self)).catch_unwind().await;

        let released = match self.adapter.as_deref_mut() {
            Some(adapter) => adapter.end_stay_connected(guard).await,
            None => {
                drop(guard);
                Ok(())
            }
        };

        match outcome {
            Ok(result) => {
                let value = result?;
                released?;
                Ok(value)
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Low-level broker client handle, built on first use
    pub fn client(&mut self) -> QueueResult<ClientHandle> {
        let (adapter, connection) = self.parts(Operation::Client)?;
        adapter.client(connection)
    }

    /// Close the broker client; the next operation builds a new one
    pub async fn reset(&mut self) -> QueueResult<()> {
        self.adapter_for(Operation::Reset)?.reset().await
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("adapter", &self.adapter_name())
            .field("connection", &self.connection)
            .finish()
    }
}

/// Subscription builder returned by [`Queue::subscribe`]
#[must_use = "a subscription does nothing until `run` is awaited"]
pub struct Subscription<'q> {
    queue: &'q mut Queue,
    queue_name: String,
    options: SubscribeOptions,
    handler: Option<Handler>,
}

impl<'q> Subscription<'q> {
    pub fn options(mut self, options: SubscribeOptions) -> Self {
        self.options = options;
        self
    }

    /// Handle each message's payload
    pub fn on_message<H>(mut self, handler: H) -> Self
    where
        H: for<'a> FnMut(&'a mut Queue, Value) -> BoxFuture<'a, QueueResult<()>> + Send + 'static,
    {
        self.handler = Some(Handler::Payload(Box::new(handler)));
        self
    }

    /// Handle each message's payload together with its transport metadata
    pub fn on_message_with_metadata<H>(mut self, handler: H) -> Self
    where
        H: for<'a> FnMut(&'a mut Queue, Value, Metadata) -> BoxFuture<'a, QueueResult<()>>
            + Send
            + 'static,
    {
        self.handler = Some(Handler::WithMetadata(Box::new(handler)));
        self
    }

    /// Consume messages until the broker ends the stream or an error occurs.
    ///
    /// The whole subscription runs inside a stay-connected scope, so handlers
    /// can publish without reconnecting.
    pub async fn run(self) -> QueueResult<()> {
        let Subscription {
            queue,
            queue_name,
            options,
            handler,
        } = self;
        let mut handler = handler.ok_or(QueueError::NoBlockGiven)?;

        let span = queue_span!(operation = "subscribe", queue = %queue_name);
        // adapters without connection state subscribe outside any scope
        let guard = match queue
            .adapter_for(Operation::Subscribe)?
            .begin_stay_connected()
        {
            Ok(guard) => guard,
            Err(QueueError::InvalidAdapter { .. }) => StayConnectedGuard::detached(),
            Err(error) => return Err(error),
        };

        queue
            .scoped(guard, move |queue| {
                Box::pin(async move {
                    let mut deliveries = {
                        let (adapter, connection) = queue.parts(Operation::Subscribe)?;
                        adapter.subscribe(connection, &queue_name, &options).await?
                    };
                    while let Some(delivery) = deliveries.next().await {
                        handler.call(queue, delivery?).await?;
                    }
                    debug!("Consumer stream ended");
                    Ok::<(), QueueError>(())
                })
            })
            .instrument(span)
            .await
    }
}
