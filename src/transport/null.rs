//! Inert broker client used by the null adapter

use super::{BrokerClient, ClientStatus, ReceiveStream};
use crate::config::QueueOptions;
use crate::error::TransportError;
use crate::message::{SendOptions, SubscribeOptions};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use uuid::Uuid;

/// Tracks connection status and otherwise does nothing
#[derive(Debug)]
pub struct NullClient {
    id: Uuid,
    status: ClientStatus,
}

impl NullClient {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            status: ClientStatus::NotConnected,
        }
    }
}

impl Default for NullClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for NullClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> ClientStatus {
        self.status
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.status = ClientStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.status = ClientStatus::NotConnected;
        Ok(())
    }

    async fn declare_queue(
        &mut self,
        _name: &str,
        _options: QueueOptions,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_to_queue(
        &mut self,
        _name: &str,
        _body: &[u8],
        _options: &SendOptions,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_qos(&mut self, _prefetch: u16) -> Result<(), TransportError> {
        Ok(())
    }

    async fn receive_from_queue(
        &mut self,
        _name: &str,
        _options: &SubscribeOptions,
    ) -> Result<ReceiveStream, TransportError> {
        Ok(stream::empty().boxed())
    }
}
