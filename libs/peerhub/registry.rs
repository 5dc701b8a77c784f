//! Peer registry
//!
//! The single owner of all session records. Handlers mutate a session
//! through [`PeerRegistry::with_session`], which serializes access to that
//! record; fan-outs iterate a snapshot so a peer disconnecting mid-iteration
//! cannot invalidate the walk.

use parking_lot::RwLock;
use peerwire::{unique_id, PeerInfo};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::session::{OutboundFrame, SessionRecord};

/// Identifies one socket connection (not the logical peer: a reconnecting
/// peer gets a new session id but keeps its peer id)
pub type SessionId = u64;

pub struct PeerRegistry {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    next_session: AtomicU64,
}

impl PeerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        })
    }

    /// Register a freshly accepted socket; allocates the session id and a
    /// candidate peer id (which `initiate` may later replace on reconnect)
    pub fn register(
        &self,
        outbound: mpsc::Sender<OutboundFrame>,
        remote_address: Option<String>,
    ) -> (SessionId, String) {
        let session_id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let peer_id = unique_id();
        let info = PeerInfo {
            id: peer_id.clone(),
            remote_address,
            ..Default::default()
        };
        self.sessions
            .write()
            .insert(session_id, SessionRecord::new(info, outbound));
        debug!(session = session_id, peer = %peer_id, "Session registered");
        (session_id, peer_id)
    }

    pub fn evict(&self, session_id: SessionId) -> Option<SessionRecord> {
        let record = self.sessions.write().remove(&session_id);
        if let Some(ref record) = record {
            debug!(session = session_id, peer = %record.info.id, "Session evicted");
        }
        record
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Mutate one session's record under the registry lock
    pub fn with_session<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&mut SessionRecord) -> T,
    ) -> Option<T> {
        self.sessions.write().get_mut(&session_id).map(f)
    }

    /// Read one session's record
    pub fn read_session<T>(
        &self,
        session_id: SessionId,
        f: impl FnOnce(&SessionRecord) -> T,
    ) -> Option<T> {
        self.sessions.read().get(&session_id).map(f)
    }

    /// Session currently owning the given logical peer id
    pub fn find_by_peer_id(&self, peer_id: &str) -> Option<SessionId> {
        self.sessions
            .read()
            .iter()
            .find(|(_, record)| record.info.id == peer_id)
            .map(|(session_id, _)| *session_id)
    }

    /// Clone of every live record, for fan-out iteration
    pub fn snapshot(&self) -> Vec<(SessionId, SessionRecord)> {
        self.sessions
            .read()
            .iter()
            .map(|(session_id, record)| (*session_id, record.clone()))
            .collect()
    }

    /// Queue a frame for a session, false when it is unknown or gone
    pub fn send_to_session(&self, session_id: SessionId, frame: OutboundFrame) -> bool {
        self.sessions
            .read()
            .get(&session_id)
            .map(|record| record.send(frame))
            .unwrap_or(false)
    }
}
