//! Integration tests for channel pub/sub and the debout observer stream

mod common;

use common::{TestClient, TestHub};
use peerhub::HubConfig;
use peerwire::{Envelope, MessageType, DEBOUT_CHANNEL};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_publish_reaches_subscribers_only() {
    let hub = TestHub::start().await;
    let (mut publisher, publisher_id) = TestClient::handshake(&hub.url(), "k1", &[]).await;
    let (mut subscriber, _) = TestClient::handshake(&hub.url(), "k1", &[]).await;
    let (mut bystander, _) = TestClient::handshake(&hub.url(), "k1", &[]).await;
    publisher.expect(MessageType::Presence).await;
    publisher.expect(MessageType::Presence).await;
    subscriber.expect(MessageType::Presence).await;

    subscriber
        .send(&Envelope::new(
            MessageType::Subscribe,
            json!({"channels": ["c1"]}),
        ))
        .await;
    // Subscription has no acknowledgment; give the hub a beat to apply it
    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher
        .send(&Envelope::new(
            MessageType::Publish,
            json!({"channel": "c1", "message": "hi"}),
        ))
        .await;

    let delivery = subscriber.expect(MessageType::Message).await;
    assert_eq!(delivery.content["channel"], json!("c1"));
    assert_eq!(delivery.content["message"], json!("hi"));
    assert!(delivery.content["time"].as_i64().is_some());
    assert_eq!(delivery.peer_ids(), vec![publisher_id]);

    bystander.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let hub = TestHub::start().await;
    let (mut client, _) = TestClient::handshake(&hub.url(), "k1", &[]).await;

    client
        .send(&Envelope::new(
            MessageType::Subscribe,
            json!({"channels": ["c1"]}),
        ))
        .await;
    client
        .send(&Envelope::new(
            MessageType::Unsubscribe,
            json!({"channels": ["c1"]}),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    client
        .send(&Envelope::new(
            MessageType::Publish,
            json!({"channel": "c1", "message": "hi"}),
        ))
        .await;

    client.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_publisher_receives_own_message_when_subscribed() {
    let hub = TestHub::start().await;
    let (mut client, _) = TestClient::handshake(&hub.url(), "k1", &[]).await;

    client
        .send(&Envelope::new(
            MessageType::Subscribe,
            json!({"channels": ["c1"]}),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    client
        .send(&Envelope::new(
            MessageType::Publish,
            json!({"channel": "c1", "message": "echo"}),
        ))
        .await;

    let delivery = client.expect(MessageType::Message).await;
    assert_eq!(delivery.content["message"], json!("echo"));
}

#[tokio::test]
async fn test_debout_observer_sees_connections() {
    let hub = TestHub::start_with(HubConfig {
        nudge_interval_ms: 0,
        debout_enabled: true,
        ..Default::default()
    })
    .await;

    let (mut observer, _) = TestClient::handshake(&hub.url(), "diag", &[]).await;
    observer
        .send(&Envelope::new(
            MessageType::Subscribe,
            json!({"channels": [DEBOUT_CHANNEL]}),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Any new connection produces a `connected` event on the channel
    let _newcomer = TestClient::connect(&hub.url()).await;

    let event = observer.expect(MessageType::Message).await;
    assert_eq!(event.content["channel"], json!(DEBOUT_CHANNEL));
    assert_eq!(event.content["message"]["type"], json!("connected"));
}

#[tokio::test]
async fn test_debout_disabled_emits_nothing() {
    let hub = TestHub::start().await;

    let (mut observer, _) = TestClient::handshake(&hub.url(), "diag", &[]).await;
    observer
        .send(&Envelope::new(
            MessageType::Subscribe,
            json!({"channels": [DEBOUT_CHANNEL]}),
        ))
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let _newcomer = TestClient::connect(&hub.url()).await;
    observer.expect_silence(Duration::from_millis(300)).await;
}
