//! Integration tests for tripwire-nats.
//!
//! These tests require a running NATS server with JetStream enabled and a
//! `tripwire`/`tripwire` account.
//! Run with: `cargo test -p tripwire-nats --features integration`
//!
//! To start NATS: `docker run -p 4222:4222 nats:latest -js --user tripwire --pass tripwire`

#![cfg(feature = "integration")]

use futures::StreamExt;
use tripwire_core::ports::TaskBroker;
use tripwire_core::{TaskMessage, Uid};
use tripwire_nats::{NatsConfig, NatsTaskBroker};

const NATS_URL: &str = "nats://localhost:4222";

fn config() -> NatsConfig {
    NatsConfig::new(NATS_URL)
        .with_credentials("tripwire", "tripwire")
        .with_stream_name("TRIPWIRE_TEST")
}

fn message(topic: &str, uid: &str) -> TaskMessage {
    TaskMessage {
        uid: Uid::from_raw(uid),
        topic: topic.to_string(),
        command: "download-latest-nightly".to_string(),
        config: serde_json::Map::new(),
        amount_index: 1,
    }
}

#[tokio::test]
async fn test_recreate_then_exists() {
    let broker = NatsTaskBroker::connect(config()).await.expect("connect");

    broker.recreate_queue("it-exists").await.expect("recreate");
    assert!(broker.queue_exists("it-exists").await.expect("exists"));
    assert!(!broker.queue_exists("it-never-created").await.expect("exists"));
}

#[tokio::test]
async fn test_publish_and_listen() {
    let broker = NatsTaskBroker::connect(config()).await.expect("connect");
    broker.recreate_queue("it-roundtrip").await.expect("recreate");

    let uid = format!("{}.it.1", chrono::Utc::now().timestamp_micros());
    broker
        .publish(&message("it-roundtrip", &uid))
        .await
        .expect("publish");

    let mut inbound = broker.listen("it-roundtrip").await.expect("listen");
    let received = tokio::time::timeout(std::time::Duration::from_secs(5), inbound.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("message");

    let task: TaskMessage = serde_json::from_slice(&received.payload).expect("decode");
    assert_eq!(task.uid.as_str(), uid);
    received.ack().await.expect("ack");

    let snapshot = broker.metrics().snapshot();
    assert_eq!(snapshot.tasks_published, 1);
    assert_eq!(snapshot.published_by_topic.get("it-roundtrip"), Some(&1));
    assert_eq!(snapshot.unacked(), 0);
}

#[tokio::test]
async fn test_missing_credentials_rejected() {
    let result = NatsTaskBroker::connect(NatsConfig::new(NATS_URL)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_graceful_shutdown() {
    let broker = NatsTaskBroker::connect(config()).await.expect("connect");

    assert!(!broker.is_shutdown());
    assert!(broker.is_connected());

    broker.shutdown().await.expect("shutdown");

    assert!(broker.is_shutdown());
    assert!(broker.publish(&message("it-closed", "x.1")).await.is_err());
}
