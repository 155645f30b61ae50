//! Hutch - pluggable AMQP queue client
//!
//! Application code talks to a [`Queue`] facade. The facade forwards to an
//! [`Adapter`] that owns a broker client, opens it lazily, closes it after each
//! operation unless a stay-connected scope is active, and runs every payload
//! through a [`MessageFilterPipeline`].
//!
//! # Overview
//!
//! - [`Queue`] - explicit context holding the active adapter and connection
//! - [`AmqpAdapter`] - adapter for AMQP 0.9.1 brokers, backed by `lapin`
//! - [`NullAdapter`] - adapter that logs calls and sends nothing
//! - [`MessageFilterPipeline`] - ordered, reversible payload transforms
//! - [`testing::MockBroker`] - in-memory broker for tests
//!
//! # Quick Start
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
//!     default_queue: Some("jobs".into()),
//!     ..Default::default()
//! })?;
//!
//! queue.publish("default", &json!({ "task": "resize", "id": 7 })).await?;
//!
//! queue
//!     .subscribe("default")
//!     .on_message(|_queue, payload| Box::pin(async move {
//!         println!("{payload}");
//!         Ok::<(), QueueError>(())
//!     }))
//!     .run()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod connection;
pub mod error;
pub mod filters;
pub mod message;
pub mod observability;
pub mod queue;
pub mod testing;
pub mod transport;

pub use adapter::{Adapter, AdapterState, AmqpAdapter, NullAdapter, Operation};
pub use config::{ConnectionOptions, QueueConfig};
pub use connection::Connection;
pub use error::{QueueError, QueueResult};
pub use filters::{FilterError, MessageFilter, MessageFilterPipeline};
pub use message::{Delivery, Metadata, PublishOptions, SubscribeOptions};
pub use queue::{Queue, Subscription};
