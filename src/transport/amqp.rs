//! AMQP 0.9.1 broker client backed by `lapin`
//!
//! One connection and one channel per client. Messages go through the
//! default exchange with the queue name as routing key, and publisher
//! confirms are awaited before a send returns.

use super::{into_handle, BrokerClient, ClientFactory, ClientHandle, ClientStatus, ReceiveStream};
use crate::config::{ClientOptions, QueueOptions};
use crate::error::{QueueError, QueueResult, TransportError};
use crate::message::{Metadata, Received, SendOptions, SubscribeOptions};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// AMQP delivery mode for messages the broker writes to disk
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Build an `amqp://` URI from client options.
///
/// The vhost is percent-encoded as a single path segment, so the default
/// vhost `/` becomes `%2F`.
pub fn build_amqp_uri(options: &ClientOptions) -> QueueResult<String> {
    let invalid = |detail: &str| {
        QueueError::invalid_connection_details(format!(
            "Invalid broker address {}:{} ({detail})",
            options.host, options.port
        ))
    };

    let mut url = Url::parse(&format!("amqp://{}:{}", options.host, options.port))
        .map_err(|e| invalid(&e.to_string()))?;
    url.set_username(&options.user)
        .map_err(|_| invalid("cannot set user"))?;
    url.set_password(Some(&options.pass))
        .map_err(|_| invalid("cannot set password"))?;

    url.path_segments_mut()
        .map_err(|_| invalid("cannot set vhost"))?
        .clear()
        .push(&options.vhost);

    Ok(url.to_string())
}

/// Broker client speaking AMQP through `lapin`
pub struct LapinClient {
    id: Uuid,
    uri: String,
    logging: bool,
    connection: Option<Connection>,
    channel: Option<Channel>,
}

impl LapinClient {
    pub fn new(options: &ClientOptions) -> QueueResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            uri: build_amqp_uri(options)?,
            logging: options.logging,
            connection: None,
            channel: None,
        })
    }

    fn channel(&self) -> Result<&Channel, TransportError> {
        self.channel
            .as_ref()
            .ok_or_else(|| "AMQP client is not connected".into())
    }

    fn log(&self, operation: &str, queue: &str) {
        if self.logging {
            debug!(client_id = %self.id, operation, queue, "AMQP operation");
        }
    }
}

impl std::fmt::Debug for LapinClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LapinClient")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

#[async_trait]
impl BrokerClient for LapinClient {
    fn id(&self) -> Uuid {
        self.id
    }

    fn status(&self) -> ClientStatus {
        match &self.connection {
            Some(connection) if connection.status().connected() => ClientStatus::Connected,
            _ => ClientStatus::NotConnected,
        }
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.status() == ClientStatus::Connected {
            return Ok(());
        }

        let connection = Connection::connect(&self.uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        self.connection = Some(connection);
        self.channel = Some(channel);
        self.log("connect", "");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.channel = None;
        if let Some(connection) = self.connection.take() {
            if connection.status().connected() {
                connection.close(200, "OK").await?;
            }
            self.log("disconnect", "");
        }
        Ok(())
    }

    async fn declare_queue(
        &mut self,
        name: &str,
        options: QueueOptions,
    ) -> Result<(), TransportError> {
        self.log("declare_queue", name);
        let declare = QueueDeclareOptions {
            durable: options.durable,
            auto_delete: options.auto_delete,
            ..QueueDeclareOptions::default()
        };
        self.channel()?
            .queue_declare(name, declare, FieldTable::default())
            .await?;
        Ok(())
    }

    async fn send_to_queue(
        &mut self,
        name: &str,
        body: &[u8],
        options: &SendOptions,
    ) -> Result<(), TransportError> {
        self.log("send_to_queue", name);
        self.channel()?
            .basic_publish(
                "",
                name,
                BasicPublishOptions::default(),
                body,
                basic_properties(options),
            )
            .await?
            .await?;
        Ok(())
    }

    async fn set_qos(&mut self, prefetch: u16) -> Result<(), TransportError> {
        self.channel()?
            .basic_qos(prefetch, BasicQosOptions::default())
            .await?;
        Ok(())
    }

    async fn receive_from_queue(
        &mut self,
        name: &str,
        options: &SubscribeOptions,
    ) -> Result<ReceiveStream, TransportError> {
        self.log("receive_from_queue", name);
        let consumer_tag = options
            .consumer_tag
            .clone()
            .unwrap_or_else(|| format!("hutch-{}", Uuid::new_v4()));
        let consume = BasicConsumeOptions {
            no_ack: true,
            exclusive: options.exclusive,
            ..BasicConsumeOptions::default()
        };

        let consumer = self
            .channel()?
            .basic_consume(name, &consumer_tag, consume, FieldTable::default())
            .await?;

        Ok(consumer
            .map(|delivery| -> Result<Received, TransportError> {
                let delivery = delivery?;
                let metadata = delivery_metadata(&delivery);
                Ok(Received::Message {
                    body: delivery.data,
                    metadata,
                })
            })
            .boxed())
    }
}

fn basic_properties(options: &SendOptions) -> BasicProperties {
    let mut properties = BasicProperties::default();
    if options.persistent {
        properties = properties.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
    }
    if let Some(content_type) = &options.content_type {
        properties = properties.with_content_type(ShortString::from(content_type.clone()));
    }
    if let Some(priority) = options.priority {
        properties = properties.with_priority(priority);
    }
    if !options.headers.is_empty() {
        let mut headers = FieldTable::default();
        for (key, value) in &options.headers {
            headers.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(value.clone().into()),
            );
        }
        properties = properties.with_headers(headers);
    }
    properties
}

fn delivery_metadata(delivery: &Delivery) -> Metadata {
    let properties = &delivery.properties;
    Metadata {
        routing_key: delivery.routing_key.as_str().to_string(),
        exchange: delivery.exchange.as_str().to_string(),
        delivery_tag: delivery.delivery_tag,
        redelivered: delivery.redelivered,
        content_type: properties
            .content_type()
            .as_ref()
            .map(|content_type| content_type.as_str().to_string()),
        headers: properties
            .headers()
            .as_ref()
            .map(header_strings)
            .unwrap_or_default(),
        received_at: Utc::now(),
    }
}

fn header_strings(table: &FieldTable) -> BTreeMap<String, String> {
    table
        .inner()
        .iter()
        .map(|(key, value)| {
            let value = match value {
                AMQPValue::ShortString(text) => text.as_str().to_string(),
                AMQPValue::Boolean(flag) => flag.to_string(),
                AMQPValue::LongLongInt(number) => number.to_string(),
                other => format!("{other:?}"),
            };
            (key.as_str().to_string(), value)
        })
        .collect()
}

/// Builds [`LapinClient`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinClientFactory;

impl ClientFactory for LapinClientFactory {
    fn build(&self, options: &ClientOptions) -> QueueResult<ClientHandle> {
        Ok(into_handle(LapinClient::new(options)?))
    }
}
