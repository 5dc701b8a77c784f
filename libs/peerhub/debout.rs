//! Diagnostic broadcast (debout)
//!
//! Mirrors hub activity to opted-in observer sessions: inbound messages,
//! outbound messages, connects, liveness terminations and client-pushed
//! payloads. Events travel as ordinary `message` envelopes on the reserved
//! channel, so an observer is just a session that subscribed to it.

use chrono::Utc;
use peerwire::{DeboutKind, Envelope, MessageType, PeerInfo, DEBOUT_CHANNEL};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::registry::PeerRegistry;
use crate::session::{OutboundFrame, SessionRecord};

pub struct DeboutBroadcaster {
    enabled: AtomicBool,
    registry: Arc<PeerRegistry>,
}

impl DeboutBroadcaster {
    pub fn new(enabled: bool, registry: Arc<PeerRegistry>) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            registry,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, value: bool) {
        self.enabled.store(value, Ordering::Relaxed);
    }

    /// Mirror an event about `subject` to every eligible observer
    ///
    /// Sends go straight to the outbound queues, not through the router's
    /// deliver path, so debout traffic never debouts itself.
    pub fn emit(&self, kind: DeboutKind, subject: &PeerInfo, payload: Value) {
        if !self.enabled() {
            return;
        }
        let body = json!({
            "time": Utc::now().timestamp_millis(),
            "channel": DEBOUT_CHANNEL,
            "message": {
                "type": kind,
                "message": payload,
                "client": subject,
            },
        });
        for (_session, record) in self.registry.snapshot() {
            if Self::eligible(&record, subject.debout_cluster.as_deref(), kind) {
                record.send(OutboundFrame::Envelope(Envelope::new(
                    MessageType::Message,
                    body.clone(),
                )));
            }
        }
    }

    /// Observer eligibility: channel subscription, kind opt-in, and cluster
    /// match when the subject carries one
    fn eligible(record: &SessionRecord, subject_cluster: Option<&str>, kind: DeboutKind) -> bool {
        let cluster_matches = match subject_cluster {
            None => true,
            Some(cluster) => record.info.debout_cluster.as_deref() == Some(cluster),
        };
        cluster_matches
            && record.state.channels.contains(DEBOUT_CHANNEL)
            && record.state.debout_kind_enabled(kind)
    }

    /// Subscribed to the diagnostic channel at all; such sessions are
    /// excluded from retrievePeers listings
    pub fn is_debout_subscriber(record: &SessionRecord) -> bool {
        record.state.channels.contains(DEBOUT_CHANNEL)
    }
}
