//! Stay-connected scope behavior
//!
//! Inside a scope the client stays open across operations; leaving the
//! outermost scope closes it exactly once, whatever way the scope exits.

use futures::FutureExt;
use hutch::testing::MockBroker;
use hutch::transport::{BrokerClient, ClientStatus};
use hutch::{AmqpAdapter, Queue, QueueError};
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::time::Duration;


use test_helpers::{mock_queue, test_options};

/// Queue whose client is already built and reports `Connected`
fn connected_queue() -> (Queue, MockBroker) {
    let (mut queue, broker) = mock_queue();
    broker.start_connected();
    queue.client().unwrap();
    (queue, broker)
}

#[tokio::test]
async fn test_publishes_share_one_connection() {
    let (mut queue, broker) = mock_queue();

    queue
        .stay_connected(|queue| {
            Box::pin(async move {
                for _ in 0..3 {
                    queue.publish("testq", &json!({"foo": "bar"})).await?;
                }
                Ok::<(), QueueError>(())
            })
        })
        .await
        .unwrap();

    assert_eq!(broker.sent_messages().len(), 3);
    assert_eq!(broker.connects(), 1);
    assert_eq!(broker.disconnects(), 1);
}

#[tokio::test]
async fn test_publishes_outside_scope_reconnect() {
    let (mut queue, broker) = mock_queue();

    for _ in 0..3 {
        queue.publish("testq", &json!(1)).await.unwrap();
    }

    assert_eq!(broker.connects(), 3);
    assert_eq!(broker.disconnects(), 3);
}

#[tokio::test]
async fn test_nested_scopes_disconnect_once() {
    let (mut queue, broker) = connected_queue();

    queue
        .stay_connected(|queue| {
            Box::pin(async move {
                queue
                    .stay_connected(|queue| {
                        Box::pin(async move {
                            queue
                                .stay_connected(|_queue| {
                                    Box::pin(async { Ok::<(), QueueError>(()) })
                                })
                                .await
                        })
                    })
                    .await
            })
        })
        .await
        .unwrap();

    assert_eq!(broker.disconnects(), 1);
}

#[tokio::test]
async fn test_nested_scopes_with_innermost_publish() {
    let (mut queue, broker) = connected_queue();

    queue
        .stay_connected(|queue| {
            Box::pin(async move {
                queue
                    .stay_connected(|queue| {
                        Box::pin(async move {
                            queue.publish("inner", &json!("x")).await?;
                            Ok::<(), QueueError>(())
                        })
                    })
                    .await?;
                let client = queue.client()?;
                assert_eq!(client.lock().await.status(), ClientStatus::Connected);
                Ok::<(), QueueError>(())
            })
        })
        .await
        .unwrap();

    assert_eq!(broker.sent_messages().len(), 1);
    assert_eq!(broker.connects(), 0);
    assert_eq!(broker.disconnects(), 1);
}

#[tokio::test]
async fn test_scope_returns_block_value() {
    let (mut queue, _broker) = mock_queue();

    let value = queue
        .stay_connected(|queue| {
            Box::pin(async move {
                queue.publish("q", &json!(1)).await?;
                Ok::<_, QueueError>(vec!["a", "b"])
            })
        })
        .await
        .unwrap();

    assert_eq!(value, vec!["a", "b"]);
}

#[tokio::test]
async fn test_block_error_still_releases() {
    let broker = MockBroker::new();
    let mut queue = Queue::with_adapter(AmqpAdapter::with_factory(broker.clone()));
    queue.set_connection(test_options()).unwrap();

    let result = queue
        .stay_connected(|queue| {
            Box::pin(async move {
                queue.publish("q", &json!(1)).await?;
                Err::<(), QueueError>(QueueError::NoBlockGiven)
            })
        })
        .await;

    assert!(matches!(result, Err(QueueError::NoBlockGiven)));
    assert_eq!(broker.connects(), 1);
    assert_eq!(broker.disconnects(), 1);

    // the flag was restored, so the next publish closes its own connection
    queue.publish("q", &json!(2)).await.unwrap();
    assert_eq!(broker.disconnects(), 2);
}

#[tokio::test]
async fn test_panic_still_releases() {
    let (mut queue, broker) = mock_queue();

    let outcome = AssertUnwindSafe(queue.stay_connected(|queue| {
        Box::pin(async move {
            queue.publish("q", &json!(1)).await?;
            if queue.has_adapter() {
                panic!("handler blew up");
            }
            Ok::<(), QueueError>(())
        })
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());
    assert_eq!(broker.disconnects(), 1);

    queue.publish("q", &json!(2)).await.unwrap();
    assert_eq!(broker.disconnects(), 2);
}

#[tokio::test]
async fn test_dropped_scope_restores_flag() {
    let (mut queue, broker) = mock_queue();

    let timed_out = tokio::time::timeout(
        Duration::from_millis(20),
        queue.stay_connected(|queue| {
            Box::pin(async move {
                queue.publish("q", &json!(1)).await?;
                futures::future::pending::<()>().await;
                Ok::<(), QueueError>(())
            })
        }),
    )
    .await;
    assert!(timed_out.is_err());

    // the client is left open until the next release
    assert_eq!(broker.disconnects(), 0);

    queue.publish("q", &json!(2)).await.unwrap();
    assert_eq!(broker.connects(), 1);
    assert_eq!(broker.disconnects(), 1);
}
