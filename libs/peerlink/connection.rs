//! The client connection state machine
//!
//! One [`PeerConnection`] owns one socket at a time. A driver task walks the
//! `closed → opening → opened → closing → closed` lifecycle: it connects,
//! runs the handshake (`accept` → `initiate` → `confirm` → mirror resync),
//! pumps inbound envelopes into events and outbound envelopes onto the
//! socket, and on an abnormal close sleeps out the reconnect delay and tries
//! again — carrying the previously assigned peer id so the hub restores the
//! same logical peer.
//!
//! Sends issued while the socket is still `opening` are buffered: retried on
//! a short interval until the socket opens or the send timeout expires.

use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use peerwire::{Envelope, MessageType, PeerInfo, PendingRequests};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, info, warn};

use crate::config::ConnectionParams;
use crate::error::LinkError;
use crate::events::{IncomingMessage, LinkEvent};
use crate::mirror::{MirrorEvent, PeerMirror};
use crate::sentinel::NudgeTracker;
use crate::state::{AtomicLinkMetrics, AtomicLinkState, LinkMetrics, LinkState};

/// Commands handed to the socket task
enum Outbound {
    Text(String),
    Close(u16),
}

/// State shared between the public handle, the driver task and the helper
/// tasks (send buffering, resync, sentinel)
pub(crate) struct Shared {
    params: ConnectionParams,
    state: AtomicLinkState,
    metrics: AtomicLinkMetrics,
    /// True while the connection should keep (re)connecting
    running: AtomicBool,
    peer_id: Mutex<Option<String>>,
    confirmed_user_id: Mutex<Option<String>>,
    tags: Mutex<Vec<String>>,
    properties: Mutex<Map<String, Value>>,
    options: Mutex<crate::config::PeerOptions>,
    channels: Mutex<Vec<String>>,
    debout_channel: Mutex<Option<String>>,
    mirror: Mutex<PeerMirror>,
    pending: PendingRequests,
    nudges: NudgeTracker,
    sentinel_started: AtomicBool,
    start_time_ms: AtomicI64,
    /// Poked by the sentinel to cut a reconnect pause short
    reconnect_now: Notify,
    outbound: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
    event_tx: Sender<LinkEvent>,
}

impl Shared {
    fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_mirror(&self, event: MirrorEvent) {
        match event {
            MirrorEvent::Add(peer) => self.emit(LinkEvent::AddPeer(peer)),
            MirrorEvent::Alter(peer) => self.emit(LinkEvent::AlterPeer(peer)),
            MirrorEvent::Remove(peer) => self.emit(LinkEvent::RemovePeer(peer)),
        }
    }

    fn report_error(&self, err: LinkError) {
        warn!("{}", err);
        self.emit(LinkEvent::Error(err));
    }

    fn queue_text(&self, text: String) -> Result<(), LinkError> {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx
                .send(Outbound::Text(text))
                .map_err(|_| LinkError::Unconnected),
            None => Err(LinkError::Unconnected),
        }
    }

    fn queue_envelope(&self, envelope: Envelope) -> Result<(), LinkError> {
        let text = envelope
            .to_text()
            .map_err(|e| LinkError::SendFailed(e.to_string()))?;
        self.queue_text(text)
    }

    fn queue_close(&self, code: u16) {
        if let Some(tx) = self.outbound.lock().as_ref() {
            let _ = tx.send(Outbound::Close(code));
        }
    }

    /// Send an envelope, buffering while the socket is still opening
    fn send_envelope(self: &Arc<Self>, envelope: Envelope) -> Result<(), LinkError> {
        match self.state.get() {
            LinkState::Opened | LinkState::Closing => self.queue_envelope(envelope),
            LinkState::Opening => {
                let text = envelope
                    .to_text()
                    .map_err(|e| LinkError::SendFailed(e.to_string()))?;
                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    let begin = Instant::now();
                    let mut pending_text = Some(text);
                    loop {
                        tokio::time::sleep(shared.params.resend_interval).await;
                        match shared.state.get() {
                            LinkState::Opened => {
                                if let Some(text) = pending_text.take() {
                                    if let Err(err) = shared.queue_text(text) {
                                        shared.report_error(err);
                                    }
                                }
                                break;
                            }
                            _ if begin.elapsed() >= shared.params.send_timeout => {
                                shared.report_error(LinkError::ConnectionTimeout);
                                break;
                            }
                            _ => {}
                        }
                        if !shared.running.load(Ordering::Acquire) {
                            break;
                        }
                    }
                });
                Ok(())
            }
            LinkState::Closed => Err(LinkError::Unconnected),
        }
    }
}

/// Persistent connection to a hub
pub struct PeerConnection {
    shared: Arc<Shared>,
    event_rx: Receiver<LinkEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl PeerConnection {
    pub fn new(params: ConnectionParams) -> Self {
        let (event_tx, event_rx) = unbounded();
        let shared = Arc::new(Shared {
            state: AtomicLinkState::new(LinkState::Closed),
            metrics: AtomicLinkMetrics::new(),
            running: AtomicBool::new(false),
            peer_id: Mutex::new(None),
            confirmed_user_id: Mutex::new(None),
            tags: Mutex::new(params.tags.clone()),
            properties: Mutex::new(params.properties.clone()),
            options: Mutex::new(params.options),
            channels: Mutex::new(Vec::new()),
            debout_channel: Mutex::new(None),
            mirror: Mutex::new(PeerMirror::new()),
            pending: PendingRequests::new(),
            nudges: NudgeTracker::new(),
            sentinel_started: AtomicBool::new(false),
            start_time_ms: AtomicI64::new(0),
            reconnect_now: Notify::new(),
            outbound: Mutex::new(None),
            event_tx,
            params,
        });
        Self {
            shared,
            event_rx,
            driver: Mutex::new(None),
        }
    }

    /// Start connecting; a missing linkage key is a configuration error and
    /// the connection stays closed
    pub fn open(&self) -> Result<(), LinkError> {
        self.shared.params.validate()?;

        let mut driver = self.driver.lock();
        if driver.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return Ok(());
        }
        if self
            .shared
            .state
            .compare_exchange(LinkState::Closed, LinkState::Opening)
            .is_err()
        {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::Release);
        let shared = Arc::clone(&self.shared);
        *driver = Some(tokio::spawn(run_driver(shared)));
        Ok(())
    }

    /// Announce departure, close the socket with the normal code and stop
    /// reconnecting
    pub async fn close(&self) {
        self.shared.running.store(false, Ordering::Release);
        if self.shared.state.get() != LinkState::Closed {
            self.shared.state.set(LinkState::Closing);
            let _ = self
                .shared
                .queue_envelope(Envelope::new(MessageType::Leave, Value::Null));
            self.shared.queue_close(1000);
        }
        self.shared.reconnect_now.notify_waiters();

        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                warn!("Driver did not exit in time");
            }
        }
        self.shared.state.set(LinkState::Closed);
        self.shared.pending.abandon_all();
    }

    pub fn state(&self) -> LinkState {
        self.shared.state.get()
    }

    pub fn metrics(&self) -> LinkMetrics {
        self.shared.metrics.snapshot()
    }

    pub fn connect_count(&self) -> u64 {
        self.shared.metrics.snapshot().connect_count
    }

    /// Hub-assigned peer id, stable across reconnects
    pub fn id(&self) -> Option<String> {
        self.shared.peer_id.lock().clone()
    }

    /// Encrypted userId once confirmed, the plaintext parameter before
    pub fn user_id(&self) -> String {
        self.shared
            .confirmed_user_id
            .lock()
            .clone()
            .unwrap_or_else(|| self.shared.params.user_id.clone())
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        let ms = self.shared.start_time_ms.load(Ordering::Acquire);
        if ms == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(ms).single()
    }

    pub fn tags(&self) -> Vec<String> {
        self.shared.tags.lock().clone()
    }

    pub fn properties(&self) -> Map<String, Value> {
        self.shared.properties.lock().clone()
    }

    pub fn filter_tags(&self) -> Vec<String> {
        self.shared.mirror.lock().filter_tags().to_vec()
    }

    /// Clone of the event receiver for select-style consumption
    pub fn events(&self) -> Receiver<LinkEvent> {
        self.event_rx.clone()
    }

    pub fn try_recv_event(&self) -> Option<LinkEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_event(&self) -> Result<LinkEvent, crossbeam_channel::RecvError> {
        self.event_rx.recv()
    }

    /// Fire-and-forget message to one peer
    pub fn notify(&self, peer: &str, name: &str, content: Value) -> Result<(), LinkError> {
        if peer.is_empty() {
            return Err(LinkError::InvalidParams(
                "notify requires a peer id".to_string(),
            ));
        }
        self.shared.send_envelope(
            Envelope::new(MessageType::Notify, content)
                .with_name(name)
                .with_peer(peer),
        )
    }

    /// Request/response with the default timeout
    pub async fn request(
        &self,
        peer: &str,
        name: &str,
        content: Value,
    ) -> Result<IncomingMessage, LinkError> {
        self.request_with_timeout(peer, name, content, self.shared.params.request_timeout)
            .await
    }

    /// Request/response with an explicit timeout; resolves with exactly one
    /// of the response or a timeout error
    pub async fn request_with_timeout(
        &self,
        peer: &str,
        name: &str,
        content: Value,
        timeout: Duration,
    ) -> Result<IncomingMessage, LinkError> {
        if peer.is_empty() {
            return Err(LinkError::InvalidParams(
                "request requires a peer id".to_string(),
            ));
        }
        let envelope = Envelope::new(MessageType::Request, content)
            .with_name(name)
            .with_peer(peer);
        let id = envelope.message_id.clone();
        let waiter = self.shared.pending.register(id.clone(), name, peer, timeout);
        if let Err(err) = self.shared.send_envelope(envelope) {
            self.shared.pending.cancel(&id);
            return Err(err);
        }
        match waiter.await {
            Ok(Ok(response)) => Ok(IncomingMessage::from(response)),
            Ok(Err(timeout)) => Err(LinkError::Request(timeout)),
            Err(_) => Err(LinkError::Unconnected),
        }
    }

    /// Answer an incoming request, echoing its message id
    pub fn respond(
        &self,
        peer: &str,
        message_id: &str,
        name: Option<&str>,
        content: Value,
    ) -> Result<(), LinkError> {
        if peer.is_empty() || message_id.is_empty() {
            return Err(LinkError::InvalidParams(
                "respond requires a peer id and the request's message id".to_string(),
            ));
        }
        let mut envelope = Envelope::new(MessageType::Response, content)
            .with_message_id(message_id.to_string())
            .with_peer(peer);
        if let Some(name) = name {
            envelope = envelope.with_name(name);
        }
        self.shared.send_envelope(envelope)
    }

    pub fn publish(&self, channel: &str, message: Value) -> Result<(), LinkError> {
        if channel.is_empty() || message.is_null() {
            return Err(LinkError::InvalidParams(
                "publish requires a channel and a message".to_string(),
            ));
        }
        self.shared.send_envelope(Envelope::new(
            MessageType::Publish,
            json!({ "channel": channel, "message": message }),
        ))
    }

    pub fn subscribe(&self, channels: &[&str]) -> Result<(), LinkError> {
        let cleaned = normalize_channels(channels);
        if cleaned.is_empty() {
            return Err(LinkError::InvalidParams(
                "subscribe requires at least one channel".to_string(),
            ));
        }
        let fresh: Vec<String> = {
            let mut held = self.shared.channels.lock();
            let fresh: Vec<String> = cleaned
                .into_iter()
                .filter(|channel| !held.contains(channel))
                .collect();
            held.extend(fresh.iter().cloned());
            fresh
        };
        if fresh.is_empty() {
            return Ok(());
        }
        self.shared.send_envelope(Envelope::new(
            MessageType::Subscribe,
            json!({ "channels": fresh }),
        ))
    }

    pub fn unsubscribe(&self, channels: &[&str]) -> Result<(), LinkError> {
        let cleaned = normalize_channels(channels);
        if cleaned.is_empty() {
            return Err(LinkError::InvalidParams(
                "unsubscribe requires at least one channel".to_string(),
            ));
        }
        let dropped: Vec<String> = {
            let mut held = self.shared.channels.lock();
            let dropped: Vec<String> = cleaned
                .into_iter()
                .filter(|channel| held.contains(channel))
                .collect();
            held.retain(|channel| !dropped.contains(channel));
            dropped
        };
        if dropped.is_empty() {
            return Ok(());
        }
        self.shared.send_envelope(Envelope::new(
            MessageType::Unsubscribe,
            json!({ "channels": dropped }),
        ))
    }

    /// Add tags locally and announce them; a no-op when nothing changed
    pub fn add_tag(&self, tags: &[&str]) -> Result<(), LinkError> {
        let requested: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let changed = {
            let mut held = self.shared.tags.lock();
            let mut changed = false;
            for tag in &requested {
                if !held.contains(tag) {
                    held.push(tag.clone());
                    changed = true;
                }
            }
            changed
        };
        if !changed {
            return Ok(());
        }
        self.shared
            .send_envelope(Envelope::new(MessageType::AddTag, json!(requested)))
    }

    pub fn remove_tag(&self, tags: &[&str]) -> Result<(), LinkError> {
        let requested: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let changed = {
            let mut held = self.shared.tags.lock();
            let before = held.len();
            held.retain(|tag| !requested.contains(tag));
            held.len() != before
        };
        if !changed {
            return Ok(());
        }
        self.shared
            .send_envelope(Envelope::new(MessageType::RemoveTag, json!(requested)))
    }

    /// Merge properties locally and announce the delta
    pub fn set_properties(&self, properties: Map<String, Value>) -> Result<(), LinkError> {
        {
            let mut held = self.shared.properties.lock();
            for (key, value) in properties.clone() {
                held.insert(key, value);
            }
        }
        self.shared.send_envelope(Envelope::new(
            MessageType::SetProperties,
            Value::Object(properties),
        ))
    }

    /// Narrow the mirror; triggers a full resync when the filter changed
    pub fn add_filter_tag(&self, tags: &[&str]) {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let added = self.shared.mirror.lock().add_filter_tags(&tags);
        if added > 0 {
            trigger_resync(&self.shared);
        }
    }

    pub fn remove_filter_tag(&self, tags: &[&str]) {
        let tags: Vec<String> = tags.iter().map(|t| t.to_string()).collect();
        let removed = self.shared.mirror.lock().remove_filter_tags(&tags);
        if removed > 0 {
            trigger_resync(&self.shared);
        }
    }

    /// Toggle observation of the diagnostic channel
    pub fn set_debout_receiver(&self, value: bool) -> Result<(), LinkError> {
        let changed = {
            let mut options = self.shared.options.lock();
            if options.debout_receiver == value {
                false
            } else {
                options.debout_receiver = value;
                true
            }
        };
        if !changed {
            return Ok(());
        }
        // Before the handshake the channel name is unknown; the option is
        // applied with the next initiate
        let Some(channel) = self.shared.debout_channel.lock().clone() else {
            return Ok(());
        };
        if value {
            self.subscribe(&[&channel])
        } else {
            self.unsubscribe(&[&channel])
        }
    }

    /// Push a diagnostic payload to the hub's observers
    pub fn debout(&self, message: Value) -> Result<(), LinkError> {
        self.shared
            .send_envelope(Envelope::new(MessageType::Debout, message))
    }

    pub fn debout_selection(&self, selection: Value) -> Result<(), LinkError> {
        self.shared
            .send_envelope(Envelope::new(MessageType::DeboutSelection, selection))
    }

    pub fn peer(&self, id: &str) -> Option<PeerInfo> {
        self.shared.mirror.lock().get(id).cloned()
    }

    pub fn find_peer(&self, predicate: impl FnMut(&PeerInfo) -> bool) -> Option<PeerInfo> {
        self.shared.mirror.lock().find(predicate).cloned()
    }

    pub fn filter_peers(&self, predicate: impl FnMut(&PeerInfo) -> bool) -> Vec<PeerInfo> {
        self.shared.mirror.lock().filter(predicate)
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.shared.mirror.lock().peers()
    }
}

/// Main driver loop: connect, serve, classify the ending, maybe reconnect
async fn run_driver(shared: Arc<Shared>) {
    let mut attempt: usize = 0;
    loop {
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        shared.state.set(LinkState::Opening);

        match connect_async(shared.params.url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Connected to {}", shared.params.url);
                attempt = 0;
                shared
                    .start_time_ms
                    .store(Utc::now().timestamp_millis(), Ordering::Release);
                shared.metrics.increment_connects();
                shared.state.set(LinkState::Opened);
                shared.emit(LinkEvent::Opened);

                let outcome = drive_socket(&shared, ws_stream).await;
                *shared.outbound.lock() = None;

                match outcome {
                    SocketOutcome::LocalClose | SocketOutcome::RemoteNormal => {
                        shared.state.set(LinkState::Closed);
                        shared.emit(LinkEvent::Closed);
                        break;
                    }
                    SocketOutcome::Abnormal => {
                        shared.state.set(LinkState::Closed);
                    }
                }
            }
            Err(err) => {
                shared.state.set(LinkState::Closed);
                match classify_connect_error(&err) {
                    ErrorClass::Refused => {
                        debug!("Connection refused, will retry");
                    }
                    ErrorClass::NotFound => {
                        error!("Invalid WebSocket url '{}': {}", shared.params.url, err);
                        shared.emit(LinkEvent::Error(LinkError::NotFound(
                            shared.params.url.clone(),
                        )));
                        break;
                    }
                    ErrorClass::Other => {
                        warn!("Connection failed: {}", err);
                        shared.emit(LinkEvent::Error(LinkError::Transport(err.to_string())));
                    }
                }
            }
        }

        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        let Some(delay) = shared.params.reconnect_strategy.next_delay(attempt) else {
            warn!("Reconnection strategy exhausted, giving up");
            break;
        };
        attempt += 1;
        shared.metrics.increment_reconnects();
        shared.emit(LinkEvent::Reconnecting(attempt));
        info!("Reconnecting in {:?} (attempt {})", delay, attempt);
        reconnect_pause(&shared, delay).await;
    }

    shared.state.set(LinkState::Closed);
    debug!("Connection driver exiting");
}

enum SocketOutcome {
    /// We asked for the close
    LocalClose,
    /// The hub closed with the normal code
    RemoteNormal,
    /// Anything else; the reconnect loop takes over
    Abnormal,
}

async fn drive_socket(
    shared: &Arc<Shared>,
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> SocketOutcome {
    let (mut write, mut read) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    *shared.outbound.lock() = Some(outbound_tx);

    loop {
        tokio::select! {
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        shared.metrics.increment_received();
                        handle_incoming(shared, &text);
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code)).unwrap_or(1000);
                        if shared.state.get() == LinkState::Closing {
                            return SocketOutcome::LocalClose;
                        }
                        return if code == 1000 {
                            SocketOutcome::RemoteNormal
                        } else {
                            SocketOutcome::Abnormal
                        };
                    }
                    Some(Ok(_)) => {} // transport pings/pongs
                    Some(Err(err)) => {
                        warn!("Socket error: {}", err);
                        return SocketOutcome::Abnormal;
                    }
                    None => {
                        debug!("Socket stream ended");
                        return if shared.state.get() == LinkState::Closing {
                            SocketOutcome::LocalClose
                        } else {
                            SocketOutcome::Abnormal
                        };
                    }
                }
            }
            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Text(text)) => {
                        if let Err(err) = write.send(Message::Text(text)).await {
                            shared.report_error(LinkError::SendFailed(err.to_string()));
                            return SocketOutcome::Abnormal;
                        }
                        shared.metrics.increment_sent();
                    }
                    Some(Outbound::Close(code)) => {
                        let _ = write
                            .send(Message::Close(Some(CloseFrame {
                                code: code.into(),
                                reason: "".into(),
                            })))
                            .await;
                        // keep reading until the remote acknowledges
                    }
                    None => return SocketOutcome::Abnormal,
                }
            }
            // close() may land while the connect was still in flight and
            // miss the command channel; poll the running flag so the socket
            // cannot outlive the connection
            _ = tokio::time::sleep(Duration::from_millis(250)) => {
                if !shared.running.load(Ordering::Acquire) {
                    let _ = write
                        .send(Message::Close(Some(CloseFrame {
                            code: 1000u16.into(),
                            reason: "".into(),
                        })))
                        .await;
                    return SocketOutcome::LocalClose;
                }
            }
        }
    }
}

fn handle_incoming(shared: &Arc<Shared>, text: &str) {
    let envelope = match Envelope::from_text(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            shared.report_error(LinkError::Protocol(err.to_string()));
            return;
        }
    };

    match envelope.kind {
        MessageType::Accept => on_accept(shared, envelope),
        MessageType::Confirm => on_confirm(shared, envelope),
        MessageType::Presence => {
            let Ok(peer) = serde_json::from_value::<PeerInfo>(envelope.content) else {
                return;
            };
            let event = shared.mirror.lock().apply_presence(peer);
            if let Some(event) = event {
                shared.emit_mirror(event);
            }
        }
        MessageType::Alter => {
            let Ok(peer) = serde_json::from_value::<PeerInfo>(envelope.content) else {
                return;
            };
            let event = shared.mirror.lock().apply_alter(peer);
            shared.emit_mirror(event);
        }
        MessageType::Leave => {
            let Ok(peer) = serde_json::from_value::<PeerInfo>(envelope.content) else {
                return;
            };
            let event = shared.mirror.lock().apply_leave(peer);
            shared.emit_mirror(event);
        }
        MessageType::Nudge => on_nudge(shared, envelope),
        MessageType::Message => on_channel_message(shared, envelope),
        MessageType::Response => {
            let settled = shared
                .pending
                .settle(&envelope.message_id, envelope.clone());
            if !settled {
                shared.emit(LinkEvent::Response(IncomingMessage::from(envelope)));
            }
        }
        MessageType::Notify => shared.emit(LinkEvent::Notify(IncomingMessage::from(envelope))),
        MessageType::Request => shared.emit(LinkEvent::Request(IncomingMessage::from(envelope))),
        other => {
            debug!(kind = ?other, "Ignoring client-bound message of client-to-hub type");
        }
    }
}

fn on_accept(shared: &Arc<Shared>, envelope: Envelope) {
    let accepted_id = envelope
        .content
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let debout_channel = envelope
        .content
        .get("deboutChannel")
        .and_then(Value::as_str)
        .map(str::to_string);
    *shared.debout_channel.lock() = debout_channel.clone();

    // Adopt the hub-assigned id on first contact; on reconnect keep the
    // previous one and carry it in the initiate
    let carried_id = {
        let mut peer_id = shared.peer_id.lock();
        match peer_id.as_ref() {
            Some(existing) => Some(existing.clone()),
            None => {
                *peer_id = accepted_id;
                None
            }
        }
    };

    let start_time_ms = shared.start_time_ms.load(Ordering::Acquire);
    let start_time = (start_time_ms != 0).then_some(start_time_ms);
    let options = *shared.options.lock();
    let content = json!({
        "id": carried_id,
        "deboutCluster": shared.params.debout_cluster,
        "userId": shared.params.user_id,
        "options": options,
        "properties": shared.properties.lock().clone(),
        "linkageKey": shared.params.linkage_key,
        "startTime": start_time,
        "tags": shared.tags.lock().clone(),
    });
    if let Err(err) = shared.send_envelope(Envelope::new(MessageType::Initiate, content)) {
        shared.report_error(err);
        return;
    }

    if shared.options.lock().debout_receiver {
        if let Some(channel) = debout_channel {
            {
                let mut channels = shared.channels.lock();
                if !channels.contains(&channel) {
                    channels.push(channel.clone());
                }
            }
            let _ = shared.send_envelope(Envelope::new(
                MessageType::Subscribe,
                json!({ "channels": [channel] }),
            ));
        }
    }
}

fn on_confirm(shared: &Arc<Shared>, envelope: Envelope) {
    if let Some(user_id) = envelope.content.get("userId").and_then(Value::as_str) {
        *shared.confirmed_user_id.lock() = Some(user_id.to_string());
    }
    // The hub now knows us; reconcile the mirror with its peer list
    trigger_resync(shared);
}

fn on_nudge(shared: &Arc<Shared>, envelope: Envelope) {
    let interval_ms = envelope
        .content
        .get("interval")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    let time = envelope.content.get("time").and_then(Value::as_i64);
    shared.nudges.record(interval_ms);
    ensure_sentinel(shared);
    shared.emit(LinkEvent::Nudge { time, interval_ms });
}

fn on_channel_message(shared: &Arc<Shared>, envelope: Envelope) {
    let Some(channel) = envelope.content.get("channel").and_then(Value::as_str) else {
        return;
    };
    let time = envelope.content.get("time").and_then(Value::as_i64);
    let message = envelope
        .content
        .get("message")
        .cloned()
        .unwrap_or(Value::Null);

    let is_debout = shared.debout_channel.lock().as_deref() == Some(channel);
    if is_debout {
        shared.emit(LinkEvent::Debout { time, message });
    } else {
        shared.emit(LinkEvent::ChannelMessage {
            channel: channel.to_string(),
            message,
            time,
        });
    }
}

/// Ask the hub for the full related-peer listing and reconcile the mirror
pub(crate) fn trigger_resync(shared: &Arc<Shared>) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let envelope = Envelope::new(
            MessageType::RetrievePeers,
            json!({ "linkageKey": shared.params.linkage_key }),
        );
        let id = envelope.message_id.clone();
        let waiter =
            shared
                .pending
                .register(id.clone(), "retrievePeers", "", shared.params.request_timeout);
        if let Err(err) = shared.send_envelope(envelope) {
            shared.pending.cancel(&id);
            shared.report_error(err);
            return;
        }
        match waiter.await {
            Ok(Ok(response)) => {
                let peers = response
                    .content
                    .get("peers")
                    .cloned()
                    .unwrap_or(Value::Null);
                let Ok(listing) = serde_json::from_value::<Vec<PeerInfo>>(peers) else {
                    shared.report_error(LinkError::Protocol(
                        "Malformed retrievePeers response".to_string(),
                    ));
                    return;
                };
                let events = shared.mirror.lock().resync(listing);
                for event in events {
                    shared.emit_mirror(event);
                }
            }
            Ok(Err(timeout)) => shared.report_error(LinkError::Request(timeout)),
            Err(_) => {} // abandoned during close
        }
    });
}

/// Start the awake sentinel once, on the first nudge
fn ensure_sentinel(shared: &Arc<Shared>) {
    if !shared.params.awake_sentinel {
        return;
    }
    if shared.sentinel_started.swap(true, Ordering::SeqCst) {
        return;
    }
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        debug!("Awake sentinel started");
        loop {
            tokio::time::sleep(shared.nudges.check_interval()).await;
            if !shared.running.load(Ordering::Acquire) {
                break;
            }
            let state = shared.state.get();
            let suspended = shared
                .nudges
                .elapsed_since_nudge()
                .map(|elapsed| elapsed > shared.nudges.threshold())
                .unwrap_or(false);
            if suspended && state != LinkState::Opened && state != LinkState::Opening {
                info!("Reconnecting after awakening");
                shared.emit(LinkEvent::Awakening);
                shared.reconnect_now.notify_waiters();
            }
        }
        debug!("Awake sentinel exiting");
    });
}

/// Shutdown-aware reconnect delay, interruptible by the sentinel
async fn reconnect_pause(shared: &Arc<Shared>, delay: Duration) {
    let deadline = Instant::now() + delay;
    loop {
        if !shared.running.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let slice = std::cmp::min(Duration::from_millis(100), deadline - now);
        tokio::select! {
            _ = tokio::time::sleep(slice) => {}
            _ = shared.reconnect_now.notified() => return,
        }
    }
}

enum ErrorClass {
    Refused,
    NotFound,
    Other,
}

fn classify_connect_error(err: &WsError) -> ErrorClass {
    match err {
        WsError::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ErrorClass::Refused
        }
        WsError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => ErrorClass::NotFound,
        WsError::Http(response) if response.status().as_u16() == 404 => ErrorClass::NotFound,
        WsError::Url(_) => ErrorClass::NotFound,
        _ => ErrorClass::Other,
    }
}

fn normalize_channels(channels: &[&str]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for channel in channels {
        let channel = channel.trim();
        if !channel.is_empty() && !cleaned.iter().any(|c| c == channel) {
            cleaned.push(channel.to_string());
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_channels() {
        assert_eq!(
            normalize_channels(&[" c1 ", "c2", "c1", ""]),
            vec!["c1".to_string(), "c2".to_string()]
        );
        assert!(normalize_channels(&["", "  "]).is_empty());
    }

    #[tokio::test]
    async fn test_open_without_linkage_key_fails() {
        let connection = PeerConnection::new(ConnectionParams::new("ws://127.0.0.1:1", ""));
        assert_eq!(connection.open(), Err(LinkError::LinkageKeyMissing));
        assert_eq!(connection.state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_send_while_closed_is_unconnected() {
        let connection = PeerConnection::new(ConnectionParams::new("ws://127.0.0.1:1", "k1"));
        let err = connection
            .notify("someone", "ping", json!({"n": 1}))
            .unwrap_err();
        assert_eq!(err, LinkError::Unconnected);
    }

    #[tokio::test]
    async fn test_publish_validates_parameters() {
        let connection = PeerConnection::new(ConnectionParams::new("ws://127.0.0.1:1", "k1"));
        assert!(matches!(
            connection.publish("", json!("x")),
            Err(LinkError::InvalidParams(_))
        ));
        assert!(matches!(
            connection.publish("c1", Value::Null),
            Err(LinkError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_validates_parameters() {
        let connection = PeerConnection::new(ConnectionParams::new("ws://127.0.0.1:1", "k1"));
        assert!(matches!(
            connection.subscribe(&[]),
            Err(LinkError::InvalidParams(_))
        ));
        assert!(matches!(
            connection.subscribe(&["", "  "]),
            Err(LinkError::InvalidParams(_))
        ));
    }
}
