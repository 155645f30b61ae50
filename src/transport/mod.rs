//! Broker client abstraction
//!
//! Adapters never speak AMQP themselves. They drive a [`BrokerClient`], built
//! on demand by a [`ClientFactory`], and hold it behind a shared
//! [`ClientHandle`] so callers can reach the raw client for advanced use.

use crate::config::{ClientOptions, QueueOptions};
use crate::error::{QueueResult, TransportError};
use crate::message::{Received, SendOptions, SubscribeOptions};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub mod amqp;
pub mod null;

pub use amqp::{build_amqp_uri, LapinClient, LapinClientFactory};
pub use null::NullClient;

/// Connection status reported by a broker client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    NotConnected,
    Connected,
}

/// Inbound messages for one consumer. Infinite for a live broker.
pub type ReceiveStream = BoxStream<'static, Result<Received, TransportError>>;

/// Shared, lockable broker client
pub type ClientHandle = Arc<Mutex<dyn BrokerClient>>;

/// Operations an adapter needs from a broker client library
#[async_trait]
pub trait BrokerClient: Send {
    /// Identity of this client instance, stable for its lifetime
    fn id(&self) -> Uuid;

    fn status(&self) -> ClientStatus;

    /// Open the connection to the broker
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the connection to the broker
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Declare a queue; redeclaring an existing queue is a no-op
    async fn declare_queue(&mut self, name: &str, options: QueueOptions)
        -> Result<(), TransportError>;

    /// Send a message body to a queue through the default exchange
    async fn send_to_queue(
        &mut self,
        name: &str,
        body: &[u8],
        options: &SendOptions,
    ) -> Result<(), TransportError>;

    /// Set consumer prefetch for subsequent consumers
    async fn set_qos(&mut self, prefetch: u16) -> Result<(), TransportError>;

    /// Start consuming a queue
    async fn receive_from_queue(
        &mut self,
        name: &str,
        options: &SubscribeOptions,
    ) -> Result<ReceiveStream, TransportError>;
}

impl std::fmt::Debug for dyn BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

/// Builds broker clients from connection options
pub trait ClientFactory: Send + Sync {
    fn build(&self, options: &ClientOptions) -> QueueResult<ClientHandle>;
}

/// Wrap a concrete client in a [`ClientHandle`]
pub fn into_handle<C: BrokerClient + 'static>(client: C) -> ClientHandle {
    Arc::new(Mutex::new(client))
}
