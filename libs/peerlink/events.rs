//! Events delivered to the application
//!
//! Everything the connection observes — lifecycle transitions, mirror
//! updates, relayed messages, diagnostics — arrives as one [`LinkEvent`] on
//! an unbounded channel, read with `try_recv_event`/`recv_event` or by
//! cloning the receiver via `events()`.

use peerwire::{Envelope, PeerInfo};
use serde_json::Value;

use crate::error::LinkError;

/// A relayed message as the application sees it
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Id of the peer that sent it (absent for hub-originated envelopes)
    pub peer: Option<String>,
    pub name: Option<String>,
    /// Correlates responses with requests; echo it back in `respond`
    pub message_id: String,
    pub content: Value,
}

impl From<Envelope> for IncomingMessage {
    fn from(envelope: Envelope) -> Self {
        let peer = envelope
            .peer
            .as_ref()
            .and_then(|p| p.as_single().map(str::to_string));
        Self {
            peer,
            name: envelope.name,
            message_id: envelope.message_id,
            content: envelope.content,
        }
    }
}

/// Event messages from the connection
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// Socket reached the opened state
    Opened,
    /// Connection settled closed after a deliberate or normal close
    Closed,
    /// Reconnecting (attempt number)
    Reconnecting(usize),
    /// The awake sentinel detected host suspension and forced a reconnect
    Awakening,
    /// A related peer appeared (passed the local tag filter)
    AddPeer(PeerInfo),
    /// A related peer changed; `None` when it was not in the mirror
    AlterPeer(Option<PeerInfo>),
    /// A related peer left
    RemovePeer(PeerInfo),
    /// Point-to-point notification from a peer
    Notify(IncomingMessage),
    /// A peer expects a `respond` carrying this message id
    Request(IncomingMessage),
    /// A response nobody was waiting for (its request already settled)
    Response(IncomingMessage),
    /// Pub/sub delivery on a subscribed channel
    ChannelMessage {
        channel: String,
        message: Value,
        time: Option<i64>,
    },
    /// Diagnostic broadcast delivery
    Debout { time: Option<i64>, message: Value },
    /// Hub heartbeat
    Nudge { time: Option<i64>, interval_ms: u64 },
    /// Error occurred
    Error(LinkError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerwire::MessageType;
    use serde_json::json;

    #[test]
    fn test_incoming_message_from_envelope() {
        let envelope = Envelope::new(MessageType::Notify, json!({"n": 1}))
            .with_name("greeting")
            .with_peer("sender-id");
        let id = envelope.message_id.clone();

        let incoming = IncomingMessage::from(envelope);
        assert_eq!(incoming.peer.as_deref(), Some("sender-id"));
        assert_eq!(incoming.name.as_deref(), Some("greeting"));
        assert_eq!(incoming.message_id, id);
        assert_eq!(incoming.content, json!({"n": 1}));
    }
}
