//! Scriptable in-memory broker
//!
//! [`MockBroker`] is a [`ClientFactory`] whose clients record every call in
//! shared state. Tests script inbound messages per queue, flip failure
//! switches, and inspect what was connected, declared and sent.

use crate::config::{ClientOptions, QueueOptions};
use crate::error::{QueueResult, TransportError};
use crate::message::{Metadata, Received, SendOptions, SubscribeOptions};
use crate::transport::{
    into_handle, BrokerClient, ClientFactory, ClientHandle, ClientStatus, ReceiveStream,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// A message handed to `send_to_queue`
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub queue: String,
    pub body: Vec<u8>,
    pub options: SendOptions,
}

impl SentMessage {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug)]
enum Inbound {
    Item(Received),
    Error(String),
}

#[derive(Debug, Default)]
struct MockBrokerState {
    connects: usize,
    disconnects: usize,
    built_clients: Vec<Uuid>,
    declared_queues: Vec<(String, QueueOptions)>,
    sent: Vec<SentMessage>,
    qos: Vec<u16>,
    inbound: HashMap<String, VecDeque<Inbound>>,
    next_delivery_tag: u64,
    start_connected: bool,
    fail_connect: bool,
    fail_disconnect: bool,
    fail_send: bool,
}

/// In-memory broker shared by every client it builds
#[derive(Debug, Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<MockBrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockBrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clients built from now on report `Connected` before `connect` is called
    pub fn start_connected(&self) -> &Self {
        self.state().start_connected = true;
        self
    }

    pub fn fail_connect(&self) -> &Self {
        self.state().fail_connect = true;
        self
    }

    pub fn fail_disconnect(&self) -> &Self {
        self.state().fail_disconnect = true;
        self
    }

    pub fn fail_send(&self) -> &Self {
        self.state().fail_send = true;
        self
    }

    /// Queue an inbound message routed through the default exchange
    pub fn push_message<B: Into<Vec<u8>>>(&self, queue: &str, body: B) -> &Self {
        let mut state = self.state();
        state.next_delivery_tag += 1;
        let mut metadata = Metadata::new(queue);
        metadata.delivery_tag = state.next_delivery_tag;
        push(&mut state, queue, Inbound::Item(Received::Message {
            body: body.into(),
            metadata,
        }));
        drop(state);
        self
    }

    pub fn push_message_with_metadata<B: Into<Vec<u8>>>(
        &self,
        queue: &str,
        body: B,
        metadata: Metadata,
    ) -> &Self {
        push(&mut self.state(), queue, Inbound::Item(Received::Message {
            body: body.into(),
            metadata,
        }));
        self
    }

    /// Queue the "nothing to deliver" sentinel
    pub fn push_queue_empty(&self, queue: &str) -> &Self {
        push(&mut self.state(), queue, Inbound::Item(Received::QueueEmpty));
        self
    }

    /// Queue a transport failure in the consumer stream
    pub fn push_error(&self, queue: &str, message: &str) -> &Self {
        push(&mut self.state(), queue, Inbound::Error(message.to_string()));
        self
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    /// Disconnect attempts, including failed ones
    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    pub fn built_clients(&self) -> Vec<Uuid> {
        self.state().built_clients.clone()
    }

    pub fn declared_queues(&self) -> Vec<String> {
        self.state()
            .declared_queues
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn declared_queue_options(&self) -> Vec<QueueOptions> {
        self.state()
            .declared_queues
            .iter()
            .map(|(_, options)| *options)
            .collect()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.state().sent.clone()
    }

    /// Prefetch values set on any client, in call order
    pub fn qos(&self) -> Vec<u16> {
        self.state().qos.clone()
    }
}

fn push(state: &mut MockBrokerState, queue: &str, item: Inbound) {
    state
        .inbound
        .entry(queue.to_string())
        .or_default()
        .push_back(item);
}

impl ClientFactory for MockBroker {
    fn build(&self, _options: &ClientOptions) -> QueueResult<ClientHandle> {
        let id = Uuid::new_v4();
        let mut state = self.state();
        state.built_clients.push(id);
        let status = if state.start_connected {
            ClientStatus::Connected
        } else {
            ClientStatus::NotConnected
        };
        drop(state);

        Ok(into_handle(MockBrokerClient {
            id,
            status,
            broker: self.clone(),
        }))
    }
}

/// Client built by [`MockBroker`]
#[derive(Debug)]
pub struct MockBrokerClient {
    id: Uuid,
    status: ClientStatus,
    broker: MockBroker,
}

impl MockBrokerClient {
    fn require_connection(&self) -> Result<(), TransportError> {
        match self.status {
            ClientStatus::Connected => Ok(()),
            ClientStatus::NotConnected => Err("mock client is not connected".into()),
        }
    }
}

#[async_trait]
impl BrokerClient for MockBrokerClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> ClientStatus {
        self.status
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        if state.fail_connect {
            return Err("mock connection refused".into());
        }
        state.connects += 1;
        self.status = ClientStatus::Connected;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.disconnects += 1;
        if state.fail_disconnect {
            return Err("mock disconnect failure".into());
        }
        self.status = ClientStatus::NotConnected;
        Ok(())
    }

    async fn declare_queue(
        &mut self,
        name: &str,
        options: QueueOptions,
    ) -> Result<(), TransportError> {
        self.require_connection()?;
        self.broker
            .state()
            .declared_queues
            .push((name.to_string(), options));
        Ok(())
    }

    async fn send_to_queue(
        &mut self,
        name: &str,
        body: &[u8],
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        self.require_connection()?;
        let mut state = self.broker.state();
        if state.fail_send {
            return Err("mock send failure".into());
        }
        state.sent.push(SentMessage {
            queue: name.to_string(),
            body: body.to_vec(),
            options: options.clone(),
        });
        Ok(())
    }

    async fn set_qos(&mut self, prefetch: u16) -> Result<(), TransportError> {
        self.require_connection()?;
        self.broker.state().qos.push(prefetch);
        Ok(())
    }

    async fn receive_from_queue(
        &mut self,
        name: &str,
        _options: &SubscribeOptions,
    ) -> Result<ReceiveStream, TransportError> {
        self.require_connection()?;
        let script: Vec<_> = self
            .broker
            .state()
            .inbound
            .remove(name)
            .unwrap_or_default()
            .into_iter()
            .map(|item| match item {
                Inbound::Item(received) => Ok(received),
                Inbound::Error(message) => Err(TransportError::from(message)),
            })
            .collect();

        Ok(stream::iter(script).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_lifecycle() {
        let broker = MockBroker::new();
        let handle = broker.build(&crate::config::ConnectionOptions::default().client_options()).unwrap();
        let mut client = handle.lock().await;

        assert!(client.send_to_queue("q", b"x", &SendOptions::default()).await.is_err());

        client.connect().await.unwrap();
        client.send_to_queue("q", b"x", &SendOptions::default()).await.unwrap();
        client.disconnect().await.unwrap();

        assert_eq!(broker.connects(), 1);
        assert_eq!(broker.disconnects(), 1);
        assert_eq!(broker.sent_messages()[0].body_text(), "x");
        assert_eq!(broker.built_clients(), vec![client.id()]);
    }

    #[tokio::test]
    async fn test_script_drains_once() {
        let broker = MockBroker::new();
        broker.start_connected();
        broker.push_message("q", "a").push_queue_empty("q");

        let handle = broker.build(&crate::config::ConnectionOptions::default().client_options()).unwrap();
        let mut client = handle.lock().await;

        let first: Vec<_> = client
            .receive_from_queue("q", &SubscribeOptions::default())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(first.len(), 2);

        let mut second = client
            .receive_from_queue("q", &SubscribeOptions::default())
            .await
            .unwrap();
        assert!(second.next().await.is_none());
    }
}
