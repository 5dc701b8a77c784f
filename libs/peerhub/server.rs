//! The hub server
//!
//! Owns the accept loop and the per-connection plumbing: each socket gets a
//! writer task draining its bounded outbound queue and a read loop feeding
//! the router. A slow or dead socket therefore never stalls another
//! session's traffic — its queue fills up and frames are dropped on the
//! floor until the liveness monitor reaps it.

use futures::{SinkExt, StreamExt};
use peerwire::DeboutKind;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::crypting::Crypting;
use crate::debout::DeboutBroadcaster;
use crate::liveness::LivenessMonitor;
use crate::registry::PeerRegistry;
use crate::router::HubRouter;
use crate::session::OutboundFrame;

pub struct PeerHub {
    config: HubConfig,
    ping_interval_ms: AtomicU64,
    nudge_interval_ms: AtomicU64,
    registry: Arc<PeerRegistry>,
    router: Arc<HubRouter>,
    debout: Arc<DeboutBroadcaster>,
    liveness: LivenessMonitor,
    shutdown: Notify,
}

impl PeerHub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        let registry = PeerRegistry::new();
        let crypting = Arc::new(Crypting::new(config.encryption_key.clone()));
        let debout = Arc::new(DeboutBroadcaster::new(
            config.debout_enabled,
            Arc::clone(&registry),
        ));
        let router = Arc::new(HubRouter::new(
            Arc::clone(&registry),
            crypting,
            Arc::clone(&debout),
        ));
        let liveness = LivenessMonitor::new(Arc::clone(&registry), Arc::clone(&router));

        Arc::new(Self {
            ping_interval_ms: AtomicU64::new(config.ping_interval_ms),
            nudge_interval_ms: AtomicU64::new(config.nudge_interval_ms),
            registry,
            router,
            debout,
            liveness,
            shutdown: Notify::new(),
            config,
        })
    }

    /// Serve connections until [`PeerHub::shutdown`] is called
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        self.liveness
            .start_ping(self.ping_interval_ms.load(Ordering::Relaxed));
        self.liveness
            .start_nudge(self.nudge_interval_ms.load(Ordering::Relaxed));

        if let Ok(addr) = listener.local_addr() {
            info!("Hub listening on {}", addr);
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let hub = Arc::clone(&self);
                            tokio::spawn(async move {
                                handle_connection(hub, stream, addr).await;
                            });
                        }
                        Err(err) => {
                            warn!("Accept error: {}", err);
                            break;
                        }
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        self.liveness.shutdown();
    }

    pub fn shutdown(&self) {
        self.liveness.shutdown();
        self.shutdown.notify_waiters();
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<HubRouter> {
        &self.router
    }

    pub fn debout_enabled(&self) -> bool {
        self.debout.enabled()
    }

    pub fn set_debout_enabled(&self, value: bool) {
        self.debout.set_enabled(value);
    }

    pub fn ping_interval_ms(&self) -> u64 {
        self.ping_interval_ms.load(Ordering::Relaxed)
    }

    /// Change the ping cycle; restarts the loop with the new interval
    pub fn set_ping_interval_ms(&self, value: u64) {
        self.ping_interval_ms.store(value, Ordering::Relaxed);
        self.liveness.start_ping(value);
    }

    pub fn nudge_interval_ms(&self) -> u64 {
        self.nudge_interval_ms.load(Ordering::Relaxed)
    }

    /// Change the nudge cadence; restarts the loop with the new interval
    pub fn set_nudge_interval_ms(&self, value: u64) {
        self.nudge_interval_ms.store(value, Ordering::Relaxed);
        self.liveness.start_nudge(value);
    }
}

async fn handle_connection(hub: Arc<PeerHub>, stream: TcpStream, addr: SocketAddr) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!("WebSocket handshake failed: {}", err);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let (outbound_tx, mut outbound_rx) = mpsc::channel(hub.config.send_queue_size);
    let (session, peer_id) = hub
        .registry
        .register(outbound_tx, Some(addr.ip().to_string()));
    debug!(peer = %peer_id, %addr, "Connection accepted");

    if let Some(info) = hub.registry.read_session(session, |r| r.info.clone()) {
        hub.debout
            .emit(DeboutKind::Connected, &info, Value::String(String::new()));
    }

    hub.router.accept(session);

    // One loop serves both directions; a Terminate frame (or stream end)
    // breaks out, and dropping the halves tears the socket down
    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => hub.router.handle_text(session, &text),
                    Some(Ok(Message::Pong(_))) => {
                        hub.registry
                            .with_session(session, |record| record.state.alive = true);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(peer = %peer_id, %err, "Socket error");
                        break;
                    }
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(OutboundFrame::Envelope(envelope)) => match envelope.to_text() {
                        Ok(text) => {
                            if write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(%err, "Dropping unencodable envelope"),
                    },
                    Some(OutboundFrame::Ping) => {
                        if write.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close(code)) => {
                        // keep serving until the close handshake completes
                        let _ = write
                            .send(Message::Close(Some(CloseFrame {
                                code: code.into(),
                                reason: "".into(),
                            })))
                            .await;
                    }
                    Some(OutboundFrame::Terminate) | None => break,
                }
            }
        }
    }

    // The socket is gone; announce the departure (once) and drop the record
    hub.router.fan_out_leave(session);
    hub.registry.evict(session);
    debug!(peer = %peer_id, "Connection closed");
}
