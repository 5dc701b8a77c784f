//! Common test utilities for hub integration tests
//!
//! Spawns a real hub on an ephemeral port and drives it with raw
//! tokio-tungstenite clients, so the tests exercise the full accept /
//! handshake / routing path over actual sockets.

use futures::{SinkExt, StreamExt};
use peerhub::{HubConfig, PeerHub};
use peerwire::{Envelope, MessageType};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub struct TestHub {
    pub addr: SocketAddr,
    pub hub: Arc<PeerHub>,
}

impl TestHub {
    /// Start a hub with test-friendly defaults (no nudge chatter)
    pub async fn start() -> Self {
        Self::start_with(HubConfig {
            nudge_interval_ms: 0,
            ..Default::default()
        })
        .await
    }

    pub async fn start_with(config: HubConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hub = PeerHub::new(config);
        tokio::spawn(Arc::clone(&hub).run(listener));
        Self { addr, hub }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

impl Drop for TestHub {
    fn drop(&mut self) {
        self.hub.shutdown();
    }
}

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.unwrap();
        Self { ws }
    }

    /// Connect and walk the accept → initiate → confirm handshake
    pub async fn handshake(url: &str, linkage_key: &str, tags: &[&str]) -> (Self, String) {
        let mut client = Self::connect(url).await;
        let accept = client.expect(MessageType::Accept).await;
        let id = accept.content["id"].as_str().unwrap().to_string();
        client
            .send(&Envelope::new(
                MessageType::Initiate,
                json!({ "userId": "user", "linkageKey": linkage_key, "tags": tags }),
            ))
            .await;
        client.expect(MessageType::Confirm).await;
        (client, id)
    }

    pub async fn send(&mut self, envelope: &Envelope) {
        self.ws
            .send(Message::Text(envelope.to_text().unwrap()))
            .await
            .unwrap();
    }

    /// Send an arbitrary text frame, bypassing envelope encoding
    pub async fn send_raw(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    /// Next envelope, skipping transport frames and nudges
    pub async fn next_envelope(&mut self) -> Envelope {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), self.ws.next())
                .await
                .expect("timed out waiting for an envelope")
                .expect("stream ended")
                .expect("socket error");
            match message {
                Message::Text(text) => {
                    let envelope = Envelope::from_text(&text).expect("invalid envelope");
                    if envelope.kind == MessageType::Nudge {
                        continue;
                    }
                    return envelope;
                }
                _ => continue,
            }
        }
    }

    pub async fn expect(&mut self, kind: MessageType) -> Envelope {
        let envelope = self.next_envelope().await;
        assert_eq!(envelope.kind, kind, "unexpected envelope: {:?}", envelope);
        envelope
    }

    /// Assert that no envelope arrives within the window
    pub async fn expect_silence(&mut self, window: Duration) {
        let outcome = tokio::time::timeout(window, self.next_envelope()).await;
        if let Ok(envelope) = outcome {
            panic!("expected silence, got {:?}", envelope);
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
