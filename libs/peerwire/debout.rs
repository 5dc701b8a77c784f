//! Debout: the diagnostic broadcast subsystem's wire vocabulary
//!
//! Debout events mirror hub and message lifecycle activity to opted-in
//! observer sessions. Delivery requires three things at once: the observer
//! subscribed to the reserved channel, enabled the event kind in its
//! selection, and (when the event carries a cluster) belongs to the same
//! debout cluster as the subject peer.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reserved pub/sub channel carrying diagnostic traffic
///
/// Deliberately unguessable so ordinary channel subscribers do not collide
/// with it.
pub const DEBOUT_CHANNEL: &str = "x3debout-7q1zpv0k";

/// Kinds of diagnostic events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeboutKind {
    /// A message arrived from a client
    #[serde(rename = "client2hub")]
    Client2Hub,
    /// A message was sent to a client
    #[serde(rename = "hub2client")]
    Hub2Client,
    /// A session was terminated by the liveness monitor
    #[serde(rename = "terminate")]
    Terminate,
    /// A client pushed its own diagnostic payload
    #[serde(rename = "clientdebout")]
    ClientDebout,
    /// A socket connected
    #[serde(rename = "connected")]
    Connected,
}

impl DeboutKind {
    pub const ALL: [DeboutKind; 5] = [
        DeboutKind::Client2Hub,
        DeboutKind::Hub2Client,
        DeboutKind::Terminate,
        DeboutKind::ClientDebout,
        DeboutKind::Connected,
    ];
}

/// Per-session opt-in map, every kind enabled by default
pub fn default_debout_selection() -> HashMap<DeboutKind, bool> {
    DeboutKind::ALL.iter().map(|kind| (*kind, true)).collect()
}
