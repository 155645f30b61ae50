//! Client access and reset

use hutch::transport::{BrokerClient, ClientStatus};
use hutch::QueueError;
use serde_json::json;
use std::sync::Arc;


use test_helpers::mock_queue;

#[tokio::test]
async fn test_client_is_memoised() {
    let (mut queue, broker) = mock_queue();

    let first = queue.client().unwrap();
    let second = queue.client().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(broker.built_clients().len(), 1);
}

#[tokio::test]
async fn test_client_accessor_does_not_connect() {
    let (mut queue, broker) = mock_queue();

    let client = queue.client().unwrap();

    assert_eq!(client.lock().await.status(), ClientStatus::NotConnected);
    assert_eq!(broker.connects(), 0);
}

#[tokio::test]
async fn test_client_survives_publish() {
    let (mut queue, broker) = mock_queue();
    let before = queue.client().unwrap();

    queue.publish("q", &json!(1)).await.unwrap();

    let after = queue.client().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(broker.built_clients().len(), 1);
}

#[tokio::test]
async fn test_client_requires_connection_details() {
    let mut queue = hutch::Queue::with_adapter(hutch::NullAdapter::new());
    assert!(matches!(queue.client(), Err(QueueError::NoConnectionDetails)));
}

#[tokio::test]
async fn test_reset_stops_client_once() {
    let (mut queue, broker) = mock_queue();
    broker.start_connected();
    queue.client().unwrap();

    queue.reset().await.unwrap();

    assert_eq!(broker.disconnects(), 1);
}

#[tokio::test]
async fn test_reset_forces_new_client() {
    let (mut queue, broker) = mock_queue();

    let old = queue.client().unwrap();
    let old_id = old.lock().await.id();
    queue.reset().await.unwrap();
    let new = queue.client().unwrap();
    let new_id = new.lock().await.id();

    assert!(!Arc::ptr_eq(&old, &new));
    assert_ne!(old_id, new_id);
    assert_eq!(broker.built_clients(), vec![old_id, new_id]);
}

#[tokio::test]
async fn test_reset_ignores_disconnect_failure() {
    let (mut queue, broker) = mock_queue();
    broker.start_connected().fail_disconnect();
    let old = queue.client().unwrap();

    assert!(queue.reset().await.is_ok());
    assert_eq!(broker.disconnects(), 1);

    let new = queue.client().unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
}

#[tokio::test]
async fn test_reset_without_client_is_noop() {
    let (mut queue, broker) = mock_queue();

    queue.reset().await.unwrap();

    assert_eq!(broker.disconnects(), 0);
    assert!(broker.built_clients().is_empty());
}

#[tokio::test]
async fn test_publish_after_reset_uses_fresh_client() {
    let (mut queue, broker) = mock_queue();

    queue.publish("q", &json!(1)).await.unwrap();
    queue.reset().await.unwrap();
    queue.publish("q", &json!(2)).await.unwrap();

    assert_eq!(broker.built_clients().len(), 2);
    assert_eq!(broker.sent_messages().len(), 2);
}
