//! AMQP adapter
//!
//! Drives a [`BrokerClient`] through the connect/operate/release cycle. Every
//! publish opens the client if needed and closes it afterwards unless a
//! stay-connected scope is active, so a batch of publishes inside one scope
//! shares a single connection.

use super::{Adapter, DeliveryStream, StayConnectedFlag, StayConnectedGuard};
use crate::config::ConnectionOptions;
use crate::connection::Connection;
use crate::error::{QueueError, QueueResult, TransportError};
use crate::filters::MessageFilterPipeline;
use crate::message::{Delivery, PublishOptions, Received, SubscribeOptions};
use crate::transport::{ClientFactory, ClientHandle, ClientStatus, LapinClientFactory};
use async_trait::async_trait;
use futures::future;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

/// Required connection keys, checked in this order
const REQUIRED_KEYS: [&str; 3] = ["user", "pass", "vhost"];

/// Connection state of an adapter's client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unconnected,
    Connected,
}

/// Adapter for AMQP 0.9.1 brokers
pub struct AmqpAdapter<F = LapinClientFactory> {
    factory: F,
    filters: MessageFilterPipeline,
    client: Option<ClientHandle>,
    stay_connected: StayConnectedFlag,
}

impl AmqpAdapter<LapinClientFactory> {
    /// Adapter backed by `lapin` with the default filter pipeline
    pub fn new() -> Self {
        Self::with_factory(LapinClientFactory)
    }
}

impl Default for AmqpAdapter<LapinClientFactory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ClientFactory> AmqpAdapter<F> {
    pub fn with_factory(factory: F) -> Self {
        Self {
            factory,
            filters: MessageFilterPipeline::default(),
            client: None,
            stay_connected: StayConnectedFlag::new(),
        }
    }

    /// Replace the filter pipeline used for every message
    pub fn with_filters(mut self, filters: MessageFilterPipeline) -> Self {
        self.filters = filters;
        self
    }

    pub fn filters(&self) -> &MessageFilterPipeline {
        &self.filters
    }

    pub fn is_staying_connected(&self) -> bool {
        self.stay_connected.is_set()
    }

    pub async fn state(&self) -> AdapterState {
        let Some(client) = &self.client else {
            return AdapterState::Unconnected;
        };
        match client.lock().await.status() {
            ClientStatus::Connected => AdapterState::Connected,
            ClientStatus::NotConnected => AdapterState::Unconnected,
        }
    }

    fn client_handle(&mut self, connection: &Connection) -> QueueResult<ClientHandle> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }

        let client = self.factory.build(&connection.client_options())?;
        debug!(adapter = "amqp", "Built broker client");
        self.client = Some(client.clone());
        Ok(client)
    }

    async fn ensure_connected(&mut self, connection: &Connection) -> QueueResult<ClientHandle> {
        let handle = self.client_handle(connection)?;
        {
            let mut client = handle.lock().await;
            if client.status() == ClientStatus::NotConnected {
                client.connect().await?;
                debug!(client_id = %client.id(), "Connected to broker");
            }
        }
        Ok(handle)
    }

    /// Close the client unless a stay-connected scope is active
    async fn release_if_not_persistent(&self) -> QueueResult<()> {
        if self.stay_connected.is_set() {
            return Ok(());
        }
        let Some(handle) = &self.client else {
            return Ok(());
        };

        let mut client = handle.lock().await;
        if client.status() == ClientStatus::Connected {
            client.disconnect().await?;
            debug!(client_id = %client.id(), "Disconnected from broker");
        }
        Ok(())
    }

    async fn send(
        &self,
        handle: &ClientHandle,
        connection: &Connection,
        queue_name: &str,
        body: &[u8],
        options: &PublishOptions,
    ) -> Result<(), TransportError> {
        let mut client = handle.lock().await;
        client
            .declare_queue(queue_name, connection.queue_options())
            .await?;
        client
            .send_to_queue(
                queue_name,
                body,
                &options.to_send_options(connection.durable()),
            )
            .await
    }
}

impl<F> std::fmt::Debug for AmqpAdapter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpAdapter")
            .field("filters", &self.filters)
            .field("has_client", &self.client.is_some())
            .field("stay_connected", &self.stay_connected.is_set())
            .finish()
    }
}

/// Turn one received item into a delivery, skipping the empty-queue sentinel
fn decode(
    filters: &MessageFilterPipeline,
    item: Result<Received, TransportError>,
) -> Option<QueueResult<Delivery>> {
    match item {
        Ok(Received::QueueEmpty) => None,
        Ok(Received::Message { body, metadata }) => Some(
            filters
                .unpack(&body)
                .map(|payload| Delivery { payload, metadata })
                .map_err(QueueError::from),
        ),
        Err(error) => Some(Err(QueueError::Transport(error))),
    }
}

#[async_trait]
impl<F: ClientFactory + 'static> Adapter for AmqpAdapter<F> {
    fn name(&self) -> &'static str {
        "amqp"
    }

    fn check_connection_details(&self, options: &ConnectionOptions) -> QueueResult<()> {
        for key in REQUIRED_KEYS {
            if !options.contains_key(key) {
                return Err(QueueError::invalid_connection_details(format!(
                    "{} not specified",
                    capitalize(key)
                )));
            }
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        connection: &Connection,
        queue_name: &str,
        payload: &Value,
        options: &PublishOptions,
    ) -> QueueResult<()> {
        let queue_name = connection.resolve_queue_name(queue_name)?;
        let body = self.filters.pack(payload)?;

        let handle = self.ensure_connected(connection).await?;
        let sent = self
            .send(&handle, connection, queue_name, body.as_bytes(), options)
            .await;

        match sent {
            Ok(()) => {
                debug!(queue = queue_name, bytes = body.len(), "Published message");
                self.release_if_not_persistent().await
            }
            Err(error) => {
                if let Err(release_error) = self.release_if_not_persistent().await {
                    debug!(error = %release_error, "Failed to release client after send error");
                }
                Err(QueueError::Transport(error))
            }
        }
    }

    async fn subscribe(
        &mut self,
        connection: &Connection,
        queue_name: &str,
        options: &SubscribeOptions,
    ) -> QueueResult<DeliveryStream> {
        let queue_name = connection.resolve_queue_name(queue_name)?;
        let handle = self.ensure_connected(connection).await?;

        let received = {
            let mut client = handle.lock().await;
            client.set_qos(options.prefetch).await?;
            client
                .declare_queue(queue_name, connection.queue_options())
                .await?;
            client.receive_from_queue(queue_name, options).await?
        };
        debug!(queue = queue_name, prefetch = options.prefetch, "Subscribed");

        let filters = self.filters.clone();
        Ok(received
            .filter_map(move |item| future::ready(decode(&filters, item)))
            .boxed())
    }

    fn begin_stay_connected(&mut self) -> QueueResult<StayConnectedGuard> {
        Ok(self.stay_connected.enter())
    }

    async fn end_stay_connected(&mut self, guard: StayConnectedGuard) -> QueueResult<()> {
        drop(guard);
        self.release_if_not_persistent().await
    }

    fn client(&mut self, connection: &Connection) -> QueueResult<ClientHandle> {
        self.client_handle(connection)
    }

    async fn reset(&mut self) -> QueueResult<()> {
        let Some(handle) = self.client.take() else {
            return Ok(());
        };

        let mut client = handle.lock().await;
        match client.disconnect().await {
            Ok(()) => debug!(client_id = %client.id(), "Client reset"),
            Err(error) => warn!(client_id = %client.id(), error = %error, "Ignoring disconnect failure during reset"),
        }
        Ok(())
    }
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockBroker;
    use serde_json::json;

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            host: Some("localhost".to_string()),
            user: Some("rspec".to_string()),
            pass: Some("password".to_string()),
            vhost: Some("/".to_string()),
            default_queue: Some("jobs".to_string()),
            ..Default::default()
        }
    }

    fn adapter() -> (AmqpAdapter<MockBroker>, MockBroker, Connection) {
        let broker = MockBroker::new();
        let adapter = AmqpAdapter::with_factory(broker.clone());
        let connection = Connection::new(options(), &adapter).unwrap();
        (adapter, broker, connection)
    }

    #[test]
    fn test_required_keys_in_order() {
        let adapter = AmqpAdapter::new();

        let mut missing = options();
        missing.user = None;
        missing.pass = None;
        let error = adapter.check_connection_details(&missing).unwrap_err();
        assert_eq!(error.to_string(), "User not specified");

        let mut missing = options();
        missing.vhost = None;
        let error = adapter.check_connection_details(&missing).unwrap_err();
        assert_eq!(error.to_string(), "Vhost not specified");
    }

    #[tokio::test]
    async fn test_publish_connects_and_releases() {
        let (mut adapter, broker, connection) = adapter();

        adapter
            .publish(&connection, "jobs", &json!({"foo": "bar"}), &PublishOptions::default())
            .await
            .unwrap();

        assert_eq!(broker.connects(), 1);
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(broker.declared_queues(), vec!["jobs".to_string()]);
        assert_eq!(adapter.state().await, AdapterState::Unconnected);

        let sent = broker.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].queue, "jobs");
        assert_eq!(sent[0].body, br#"{"foo":"bar"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_publish_resolves_default_queue() {
        let (mut adapter, broker, connection) = adapter();

        adapter
            .publish(&connection, "default", &json!(1), &PublishOptions::default())
            .await
            .unwrap();
        assert_eq!(broker.sent_messages()[0].queue, "jobs");
    }

    #[tokio::test]
    async fn test_publish_persistence_follows_durable() {
        let broker = MockBroker::new();
        let mut adapter = AmqpAdapter::with_factory(broker.clone());
        let mut durable = options();
        durable.durable = Some(true);
        let connection = Connection::new(durable, &adapter).unwrap();

        adapter
            .publish(&connection, "jobs", &json!(1), &PublishOptions::default().with_priority(4))
            .await
            .unwrap();

        let sent = broker.sent_messages();
        assert!(sent[0].options.persistent);
        assert_eq!(sent[0].options.priority, Some(4));
    }

    #[tokio::test]
    async fn test_scope_keeps_connection_open() {
        let (mut adapter, broker, connection) = adapter();

        let guard = adapter.begin_stay_connected().unwrap();
        for _ in 0..3 {
            adapter
                .publish(&connection, "jobs", &json!("x"), &PublishOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(adapter.state().await, AdapterState::Connected);
        assert_eq!(broker.disconnects(), 0);

        adapter.end_stay_connected(guard).await.unwrap();
        assert_eq!(broker.connects(), 1);
        assert_eq!(broker.disconnects(), 1);
        assert!(!adapter.is_staying_connected());
    }

    #[tokio::test]
    async fn test_send_failure_propagates() {
        let (mut adapter, broker, connection) = adapter();
        broker.fail_send();

        let result = adapter
            .publish(&connection, "jobs", &json!(1), &PublishOptions::default())
            .await;
        assert!(matches!(result, Err(QueueError::Transport(_))));
        assert_eq!(adapter.state().await, AdapterState::Unconnected);
    }

    #[tokio::test]
    async fn test_subscribe_skips_queue_empty() {
        let (mut adapter, broker, connection) = adapter();
        broker.push_queue_empty("jobs");
        broker.push_message("jobs", r#""hello""#);

        let guard = adapter.begin_stay_connected().unwrap();
        let stream = adapter
            .subscribe(&connection, "jobs", &SubscribeOptions::default())
            .await
            .unwrap();
        let deliveries: Vec<_> = stream.collect().await;
        adapter.end_stay_connected(guard).await.unwrap();

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].as_ref().unwrap().payload, json!("hello"));
        assert_eq!(broker.qos(), vec![1]);
    }

    #[tokio::test]
    async fn test_client_is_memoised() {
        let (mut adapter, broker, connection) = adapter();

        let first = adapter.client(&connection).unwrap();
        let second = adapter.client(&connection).unwrap();
        assert!(std::sync::Arc::ptr_eq(&first, &second));
        assert_eq!(broker.built_clients().len(), 1);
        assert_eq!(broker.connects(), 0);
    }

    #[tokio::test]
    async fn test_reset_without_client() {
        let mut adapter = AmqpAdapter::new();
        assert!(adapter.reset().await.is_ok());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("vhost"), "Vhost");
        assert_eq!(capitalize(""), "");
    }
}
