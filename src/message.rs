//! Message options and inbound delivery types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Caller options merged into every published message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub content_type: Option<String>,
    pub priority: Option<u8>,
    pub headers: BTreeMap<String, String>,
}

impl PublishOptions {
    pub fn with_header<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Combine caller options with the connection's persistence setting
    pub fn to_send_options(&self, persistent: bool) -> SendOptions {
        SendOptions {
            persistent,
            content_type: self.content_type.clone(),
            priority: self.priority,
            headers: self.headers.clone(),
        }
    }
}

/// Options handed to the broker client for a single send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    /// Ask the broker to persist the message to disk
    pub persistent: bool,
    pub content_type: Option<String>,
    pub priority: Option<u8>,
    pub headers: BTreeMap<String, String>,
}

/// Consumer options for a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Unacknowledged messages the broker may push ahead (consumer QoS)
    pub prefetch: u16,
    /// Consumer tag; generated when unset
    pub consumer_tag: Option<String>,
    pub exclusive: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            prefetch: 1,
            consumer_tag: None,
            exclusive: false,
        }
    }
}

/// Transport details that accompany an inbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub routing_key: String,
    pub exchange: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub received_at: DateTime<Utc>,
}

impl Metadata {
    /// Metadata for a message routed by `routing_key` through the default exchange
    pub fn new<S: Into<String>>(routing_key: S) -> Self {
        Self {
            routing_key: routing_key.into(),
            exchange: String::new(),
            delivery_tag: 0,
            redelivered: false,
            content_type: None,
            headers: BTreeMap::new(),
            received_at: Utc::now(),
        }
    }
}

/// One item from a broker client's receive stream
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message { body: Vec<u8>, metadata: Metadata },
    /// The queue had nothing to deliver; consumers skip it
    QueueEmpty,
}

/// A decoded inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub payload: Value,
    pub metadata: Metadata,
}
