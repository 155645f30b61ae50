//! Adapter that logs every call and talks to no broker

use super::{Adapter, DeliveryStream, StayConnectedFlag, StayConnectedGuard};
use crate::connection::Connection;
use crate::error::QueueResult;
use crate::message::{PublishOptions, SubscribeOptions};
use crate::transport::{into_handle, ClientHandle, NullClient};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::info;

/// Accepts any connection options and drops every message
pub struct NullAdapter {
    client: ClientHandle,
    stay_connected: StayConnectedFlag,
}

impl NullAdapter {
    pub fn new() -> Self {
        Self {
            client: into_handle(NullClient::new()),
            stay_connected: StayConnectedFlag::new(),
        }
    }
}

impl Default for NullAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NullAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NullAdapter")
            .field("stay_connected", &self.stay_connected.is_set())
            .finish()
    }
}

#[async_trait]
impl Adapter for NullAdapter {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn publish(
        &mut self,
        _connection: &Connection,
        queue_name: &str,
        payload: &Value,
        _options: &PublishOptions,
    ) -> QueueResult<()> {
        info!("publishing {payload} to {queue_name}");
        Ok(())
    }

    async fn subscribe(
        &mut self,
        _connection: &Connection,
        queue_name: &str,
        _options: &SubscribeOptions,
    ) -> QueueResult<DeliveryStream> {
        info!("subscribing to {queue_name}");
        Ok(stream::empty().boxed())
    }

    fn begin_stay_connected(&mut self) -> QueueResult<StayConnectedGuard> {
        info!("staying connected (begin)");
        Ok(self.stay_connected.enter())
    }

    async fn end_stay_connected(&mut self, guard: StayConnectedGuard) -> QueueResult<()> {
        drop(guard);
        info!("staying connected (end)");
        Ok(())
    }

    fn client(&mut self, _connection: &Connection) -> QueueResult<ClientHandle> {
        Ok(self.client.clone())
    }

    async fn reset(&mut self) -> QueueResult<()> {
        info!("reset");
        Ok(())
    }
}
