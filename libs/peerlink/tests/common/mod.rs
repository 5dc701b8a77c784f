//! Common test utilities for client integration tests
//!
//! Two endpoints: a real hub (full end-to-end behavior) and a scripted mock
//! hub whose connections can be killed abruptly to exercise the reconnect
//! path.

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use peerhub::{HubConfig, PeerHub};
use peerlink::{LinkEvent, PeerConnection};
use peerwire::{Envelope, MessageType};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

pub struct TestHub {
    pub addr: SocketAddr,
    pub hub: Arc<PeerHub>,
}

impl TestHub {
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

/// Wait for an event matching the predicate, discarding everything else
pub async fn wait_for_event(
    connection: &PeerConnection,
    timeout: Duration,
    mut predicate: impl FnMut(&LinkEvent) -> bool,
) -> LinkEvent {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(event) = connection.try_recv_event() {
            if predicate(&event) {
                return event;
            }
            continue;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for event");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a condition until it holds
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            panic!("timed out waiting for condition");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A scripted hub: walks the handshake, records what it receives, and can
/// drop its connections without a close frame
pub struct MockHub {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    kill: Arc<Notify>,
    initiates: Arc<Mutex<Vec<Value>>>,
    leaves: Arc<AtomicUsize>,
}

impl MockHub {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let kill = Arc::new(Notify::new());
        let initiates: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let leaves = Arc::new(AtomicUsize::new(0));

        {
            let shutdown = Arc::clone(&shutdown);
            let kill = Arc::clone(&kill);
            let initiates = Arc::clone(&initiates);
            let leaves = Arc::clone(&leaves);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        result = listener.accept() => {
                            let Ok((stream, _)) = result else { break };
                            tokio::spawn(Self::handle_connection(
                                stream,
                                Arc::clone(&kill),
                                Arc::clone(&initiates),
                                Arc::clone(&leaves),
                            ));
                        }
                        _ = shutdown.notified() => break,
                    }
                }
            });
        }

        Self {
            addr,
            shutdown,
            kill,
            initiates,
            leaves,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Drop every live connection abruptly (no close frame)
    pub fn kill_connections(&self) {
        self.kill.notify_waiters();
    }

    pub fn initiate_count(&self) -> usize {
        self.initiates.lock().len()
    }

    pub fn initiate(&self, index: usize) -> Option<Value> {
        self.initiates.lock().get(index).cloned()
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    async fn handle_connection(
        stream: TcpStream,
        kill: Arc<Notify>,
        initiates: Arc<Mutex<Vec<Value>>>,
        leaves: Arc<AtomicUsize>,
    ) {
        let mut ws = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(_) => return,
        };

        let id = peerwire::unique_id();
        let accept = Envelope::new(
            MessageType::Accept,
            json!({ "id": id, "deboutChannel": "mock-debout" }),
        );
        if ws
            .send(Message::Text(accept.to_text().unwrap()))
            .await
            .is_err()
        {
            return;
        }

        loop {
            tokio::select! {
                message = ws.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let Ok(envelope) = Envelope::from_text(&text) else { continue };
                            match envelope.kind {
                                MessageType::Initiate => {
                                    initiates.lock().push(envelope.content.clone());
                                    let confirm = Envelope::new(
                                        MessageType::Confirm,
                                        json!({ "userId": "encrypted-user" }),
                                    );
                                    let _ = ws
                                        .send(Message::Text(confirm.to_text().unwrap()))
                                        .await;
                                }
                                MessageType::RetrievePeers => {
                                    let reply = Envelope::new(
                                        MessageType::Response,
                                        json!({ "peers": [] }),
                                    )
                                    .with_message_id(envelope.message_id)
                                    .with_name("retrievePeers");
                                    let _ = ws
                                        .send(Message::Text(reply.to_text().unwrap()))
                                        .await;
                                }
                                MessageType::Leave => {
                                    leaves.fetch_add(1, Ordering::SeqCst);
                                    let _ = ws
                                        .close(Some(CloseFrame {
                                            code: 1000u16.into(),
                                            reason: "".into(),
                                        }))
                                        .await;
                                }
                                _ => {}
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    }
                }
                _ = kill.notified() => {
                    // vanish without saying goodbye
                    return;
                }
            }
        }
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        self.kill.notify_waiters();
    }
}
