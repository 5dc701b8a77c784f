//! Per-socket session state
//!
//! Each connected socket gets one [`SessionRecord`]: the public
//! [`PeerInfo`] other peers may see, plus the private [`SessionState`] the
//! hub keeps to itself (subscriptions, fan-out options, debout selection,
//! liveness bookkeeping). Records are owned exclusively by the registry;
//! nothing outside it mutates them.

use peerwire::{default_debout_selection, DeboutKind, Envelope, PeerInfo};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::debug;

/// Frames the per-connection writer task understands
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Envelope(Envelope),
    /// Protocol-level ping; the transport answers with a Pong
    Ping,
    /// Begin a graceful close with the given close code
    Close(u16),
    /// Drop the connection immediately
    Terminate,
}

/// Fan-out options a peer may set at initiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// This peer announces its presence/changes/departure to related peers
    pub peer_initiation_sender: bool,
    /// This peer receives such announcements from related peers
    pub peer_initiation_receiver: bool,
    /// This peer is a diagnostics observer (excluded from retrievePeers)
    pub debout_receiver: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            peer_initiation_sender: true,
            peer_initiation_receiver: true,
            debout_receiver: false,
        }
    }
}

/// Partial options as they arrive on the wire; unset fields keep their
/// current value
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionOptionsPatch {
    pub peer_initiation_sender: Option<bool>,
    pub peer_initiation_receiver: Option<bool>,
    pub debout_receiver: Option<bool>,
}

impl SessionOptions {
    pub fn apply(&mut self, patch: &SessionOptionsPatch) {
        if let Some(value) = patch.peer_initiation_sender {
            self.peer_initiation_sender = value;
        }
        if let Some(value) = patch.peer_initiation_receiver {
            self.peer_initiation_receiver = value;
        }
        if let Some(value) = patch.debout_receiver {
            self.debout_receiver = value;
        }
    }
}

/// Private hub-side bookkeeping for one session
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Subscribed pub/sub channels
    pub channels: HashSet<String>,
    pub options: SessionOptions,
    /// Per-kind debout opt-in, defaults to everything
    pub debout_selection: HashMap<DeboutKind, bool>,
    /// Cleared each ping cycle, set again by the pong
    pub alive: bool,
    /// One-shot guard so the leave fan-out happens at most once
    pub left_the_building: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            channels: HashSet::new(),
            options: SessionOptions::default(),
            debout_selection: default_debout_selection(),
            alive: true,
            left_the_building: false,
        }
    }
}

impl SessionState {
    /// Whether a given debout kind is enabled for this session
    pub fn debout_kind_enabled(&self, kind: DeboutKind) -> bool {
        self.debout_selection.get(&kind).copied().unwrap_or(true)
    }
}

/// Everything the hub tracks about one connected socket
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub info: PeerInfo,
    pub state: SessionState,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl SessionRecord {
    pub fn new(info: PeerInfo, outbound: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            info,
            state: SessionState::default(),
            outbound,
        }
    }

    /// Queue a frame without blocking; a full queue drops the frame, a
    /// closed queue means the socket is already gone
    pub fn send(&self, frame: OutboundFrame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(peer = %self.info.id, "Outbound queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// True when the writer task behind this record has exited
    pub fn is_gone(&self) -> bool {
        self.outbound.is_closed()
    }
}
