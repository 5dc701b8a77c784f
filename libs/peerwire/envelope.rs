//! The wire envelope
//!
//! Every frame exchanged between hub and client is one JSON envelope:
//! `{type, messageId, name?, peer?, content}`. The message type is a closed
//! enum resolved at compile time; a frame carrying an unknown type fails to
//! decode and is surfaced by the caller as a protocol error, never as a
//! missing-handler condition.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;
use crate::message_id;

/// The full catalog of wire message types
///
/// Directionality (hub→client, client→hub or relayed) is enforced by the
/// respective routers, not by the type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Accept,
    Initiate,
    Confirm,
    Presence,
    Alter,
    Leave,
    Notify,
    Request,
    Response,
    Publish,
    Message,
    Subscribe,
    Unsubscribe,
    AddTag,
    RemoveTag,
    SetProperties,
    DeboutSelection,
    Debout,
    Nudge,
    RetrievePeers,
}

/// Target peer id(s) of an envelope
///
/// `notify` accepts a list of targets; everything else uses a single id.
/// Outbound envelopes emitted by the hub always carry a single id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PeerRef {
    One(String),
    Many(Vec<String>),
}

impl PeerRef {
    /// All referenced peer ids, in order
    pub fn ids(&self) -> Vec<String> {
        match self {
            PeerRef::One(id) => vec![id.clone()],
            PeerRef::Many(ids) => ids.clone(),
        }
    }

    /// The single referenced id, if there is exactly one
    pub fn as_single(&self) -> Option<&str> {
        match self {
            PeerRef::One(id) => Some(id),
            PeerRef::Many(ids) if ids.len() == 1 => Some(&ids[0]),
            PeerRef::Many(_) => None,
        }
    }
}

impl From<&str> for PeerRef {
    fn from(id: &str) -> Self {
        PeerRef::One(id.to_string())
    }
}

impl From<String> for PeerRef {
    fn from(id: String) -> Self {
        PeerRef::One(id)
    }
}

/// The wire unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(rename = "messageId", default)]
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerRef>,
    #[serde(default)]
    pub content: Value,
}

impl Envelope {
    /// Create an envelope with a freshly minted message id
    pub fn new(kind: MessageType, content: Value) -> Self {
        Self {
            kind,
            message_id: message_id::unique_id(),
            name: None,
            peer: None,
            content,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_peer(mut self, peer: impl Into<PeerRef>) -> Self {
        self.peer = Some(peer.into());
        self
    }

    /// Override the minted id, used when a response must echo the id of the
    /// request it answers
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = id.into();
        self
    }

    pub fn to_text(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    pub fn from_text(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Decode)
    }

    /// Target peer ids, empty when the envelope carries none
    pub fn peer_ids(&self) -> Vec<String> {
        self.peer.as_ref().map(PeerRef::ids).unwrap_or_default()
    }
}
