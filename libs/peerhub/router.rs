//! Hub router
//!
//! Decodes inbound envelopes, walks each socket through the handshake
//! (`accept` → `initiate` → `confirm` → `presence` fan-out) and dispatches
//! steady-state messages to exactly one handler per type. Unknown types and
//! malformed frames are protocol errors: logged with the offending peer and
//! payload, then dropped — the connection stays open. Routing to a peer id
//! that is no longer registered is a silent no-op, since peers legitimately
//! disconnect mid-flight.

use chrono::Utc;
use peerwire::{DeboutKind, Envelope, MessageType, PeerInfo, DEBOUT_CHANNEL};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::crypting::Crypting;
use crate::debout::DeboutBroadcaster;
use crate::registry::{PeerRegistry, SessionId};
use crate::relation::related;
use crate::session::{OutboundFrame, SessionOptionsPatch, SessionRecord};

/// Grace period between a leave-initiated close and forced termination
const LEAVE_GRACE: Duration = Duration::from_secs(20);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InitiateContent {
    id: Option<String>,
    user_id: String,
    linkage_key: String,
    tags: Vec<String>,
    properties: Map<String, Value>,
    options: SessionOptionsPatch,
    debout_cluster: Option<String>,
    start_time: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelsContent {
    channels: Vec<String>,
}

pub struct HubRouter {
    registry: Arc<PeerRegistry>,
    crypting: Arc<Crypting>,
    debout: Arc<DeboutBroadcaster>,
}

impl HubRouter {
    pub fn new(
        registry: Arc<PeerRegistry>,
        crypting: Arc<Crypting>,
        debout: Arc<DeboutBroadcaster>,
    ) -> Self {
        Self {
            registry,
            crypting,
            debout,
        }
    }

    /// First message of the handshake, sent as soon as a socket is
    /// registered
    pub fn accept(&self, session: SessionId) {
        let Some(info) = self.registry.read_session(session, |r| r.info.clone()) else {
            return;
        };
        let envelope = Envelope::new(
            MessageType::Accept,
            json!({ "id": info.id, "deboutChannel": DEBOUT_CHANNEL }),
        )
        .with_peer(info.id.clone());
        self.send_to_session(session, envelope);
    }

    /// Decode and dispatch one inbound text frame
    pub fn handle_text(&self, session: SessionId, text: &str) {
        let envelope = match Envelope::from_text(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                let peer = self
                    .registry
                    .read_session(session, |r| r.info.id.clone())
                    .unwrap_or_default();
                warn!(%peer, %err, payload = text, "Discarding malformed message");
                return;
            }
        };

        if envelope.kind != MessageType::Debout {
            if let Some(info) = self.registry.read_session(session, |r| r.info.clone()) {
                self.debout.emit(
                    DeboutKind::Client2Hub,
                    &info,
                    serde_json::to_value(&envelope).unwrap_or(Value::Null),
                );
            }
        }

        match envelope.kind {
            MessageType::Initiate => self.on_initiate(session, envelope),
            MessageType::AddTag => self.on_add_tag(session, envelope),
            MessageType::RemoveTag => self.on_remove_tag(session, envelope),
            MessageType::SetProperties => self.on_set_properties(session, envelope),
            MessageType::DeboutSelection => self.on_debout_selection(session, envelope),
            MessageType::Notify => self.on_notify(session, envelope),
            MessageType::Request => self.relay(session, envelope, MessageType::Request),
            MessageType::Response => self.relay(session, envelope, MessageType::Response),
            MessageType::Publish => self.on_publish(session, envelope),
            MessageType::Subscribe => self.on_subscribe(session, envelope),
            MessageType::Unsubscribe => self.on_unsubscribe(session, envelope),
            MessageType::RetrievePeers => self.on_retrieve_peers(session, envelope),
            MessageType::Leave => self.on_leave(session),
            MessageType::Debout => self.on_debout(session, envelope),
            MessageType::Accept
            | MessageType::Confirm
            | MessageType::Presence
            | MessageType::Alter
            | MessageType::Message
            | MessageType::Nudge => {
                warn!(
                    kind = ?envelope.kind,
                    "Discarding inbound message of hub-to-client type"
                );
            }
        }
    }

    fn on_initiate(&self, session: SessionId, envelope: Envelope) {
        let content: InitiateContent = match serde_json::from_value(envelope.content) {
            Ok(content) => content,
            Err(err) => {
                warn!(%err, "Discarding malformed initiate");
                return;
            }
        };

        let user_id = if content.user_id.is_empty() {
            String::new()
        } else {
            match self.crypting.encrypt(&content.user_id) {
                Ok(encrypted) => encrypted,
                Err(err) => {
                    warn!(%err, "UserId encryption failed, storing empty userId");
                    String::new()
                }
            }
        };

        let updated = self.registry.with_session(session, |record| {
            record.info.user_id = user_id;
            record.info.linkage_key = content.linkage_key;
            record.info.start_time = content.start_time;
            record.info.debout_cluster = content.debout_cluster;
            if let Some(id) = content.id {
                // Reconnection: the socket is new, the logical peer is not
                record.info.id = id;
            }
            record.info.merge_properties(content.properties);
            record.info.add_tags(&content.tags);
            record.state.options.apply(&content.options);
            record.info.clone()
        });
        let Some(info) = updated else { return };

        self.confirm(session, &info);
        self.fan_out(session, MessageType::Presence);
    }

    fn confirm(&self, session: SessionId, info: &PeerInfo) {
        let envelope = Envelope::new(MessageType::Confirm, json!({ "userId": info.user_id }))
            .with_peer(info.id.clone());
        self.send_to_session(session, envelope);
    }

    fn on_add_tag(&self, session: SessionId, envelope: Envelope) {
        let tags = string_list(&envelope.content);
        self.registry.with_session(session, |record| {
            record.info.add_tags(&tags);
        });
        self.fan_out(session, MessageType::Alter);
    }

    fn on_remove_tag(&self, session: SessionId, envelope: Envelope) {
        let tags = string_list(&envelope.content);
        self.registry.with_session(session, |record| {
            record.info.remove_tags(&tags);
        });
        self.fan_out(session, MessageType::Alter);
    }

    fn on_set_properties(&self, session: SessionId, envelope: Envelope) {
        if let Value::Object(properties) = envelope.content {
            self.registry.with_session(session, |record| {
                record.info.merge_properties(properties);
            });
        }
        self.fan_out(session, MessageType::Alter);
    }

    fn on_debout_selection(&self, session: SessionId, envelope: Envelope) {
        if let Value::Object(selection) = envelope.content {
            self.registry.with_session(session, |record| {
                for (key, value) in selection {
                    // Only known kinds make it into the selection
                    if let Ok(kind) = serde_json::from_value::<DeboutKind>(Value::String(key)) {
                        record
                            .state
                            .debout_selection
                            .insert(kind, value.as_bool().unwrap_or(false));
                    }
                }
            });
        }
        self.fan_out(session, MessageType::Alter);
    }

    fn on_notify(&self, session: SessionId, envelope: Envelope) {
        let Some(sender_id) = self.registry.read_session(session, |r| r.info.id.clone()) else {
            return;
        };
        for target in envelope.peer_ids() {
            let Some(target_session) = self.registry.find_by_peer_id(&target) else {
                continue;
            };
            let forwarded = Envelope {
                kind: MessageType::Notify,
                message_id: envelope.message_id.clone(),
                name: envelope.name.clone(),
                peer: Some(sender_id.clone().into()),
                content: envelope.content.clone(),
            };
            self.send_to_session(target_session, forwarded);
        }
    }

    /// Forward a request or response to its target peer, preserving the
    /// messageId that correlates the pair
    fn relay(&self, session: SessionId, envelope: Envelope, kind: MessageType) {
        let Some(sender_id) = self.registry.read_session(session, |r| r.info.id.clone()) else {
            return;
        };
        let Some(target) = envelope.peer_ids().into_iter().next() else {
            return;
        };
        let Some(target_session) = self.registry.find_by_peer_id(&target) else {
            debug!(%target, kind = ?kind, "Relay target unknown, dropping");
            return;
        };
        let forwarded = Envelope {
            kind,
            message_id: envelope.message_id,
            name: envelope.name,
            peer: Some(sender_id.into()),
            content: envelope.content,
        };
        self.send_to_session(target_session, forwarded);
    }

    fn on_publish(&self, session: SessionId, envelope: Envelope) {
        let channel = envelope
            .content
            .get("channel")
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = envelope.content.get("message").cloned();
        let (Some(channel), Some(message)) = (channel, message) else {
            return;
        };
        if message.is_null() {
            return;
        }
        let Some(sender_id) = self.registry.read_session(session, |r| r.info.id.clone()) else {
            return;
        };

        let time = Utc::now().timestamp_millis();
        for (_session, record) in self.registry.snapshot() {
            if record.state.channels.contains(&channel) {
                let delivery = Envelope {
                    kind: MessageType::Message,
                    message_id: envelope.message_id.clone(),
                    name: None,
                    peer: Some(sender_id.clone().into()),
                    content: json!({
                        "channel": &channel,
                        "message": &message,
                        "time": time,
                    }),
                };
                self.deliver(&record, delivery);
            }
        }
    }

    fn on_subscribe(&self, session: SessionId, envelope: Envelope) {
        let Ok(content) = serde_json::from_value::<ChannelsContent>(envelope.content) else {
            return;
        };
        self.registry.with_session(session, |record| {
            for channel in content.channels {
                record.state.channels.insert(channel);
            }
        });
    }

    fn on_unsubscribe(&self, session: SessionId, envelope: Envelope) {
        let Ok(content) = serde_json::from_value::<ChannelsContent>(envelope.content) else {
            return;
        };
        self.registry.with_session(session, |record| {
            for channel in &content.channels {
                record.state.channels.remove(channel);
            }
        });
    }

    fn on_retrieve_peers(&self, session: SessionId, envelope: Envelope) {
        let Some(requester) = self.registry.read_session(session, |r| r.info.clone()) else {
            return;
        };
        let peers: Vec<PeerInfo> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|(_, record)| {
                record.info.id != requester.id
                    && record.info.linkage_key == requester.linkage_key
                    && !DeboutBroadcaster::is_debout_subscriber(record)
            })
            .map(|(_, record)| record.info)
            .collect();

        let reply = Envelope::new(MessageType::Response, json!({ "peers": peers }))
            .with_message_id(envelope.message_id)
            .with_name("retrievePeers");
        self.send_to_session(session, reply);
    }

    fn on_leave(&self, session: SessionId) {
        let peer = self
            .registry
            .read_session(session, |r| r.info.id.clone())
            .unwrap_or_default();
        info!(%peer, "Leave requested");

        self.registry
            .send_to_session(session, OutboundFrame::Close(1000));
        self.fan_out_leave(session);

        // If the close handshake never completes, cut the socket loose
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            tokio::time::sleep(LEAVE_GRACE).await;
            if registry.send_to_session(session, OutboundFrame::Terminate) {
                warn!(%peer, "Close did not complete within grace period, terminating");
            }
        });
    }

    fn on_debout(&self, session: SessionId, envelope: Envelope) {
        if let Some(info) = self.registry.read_session(session, |r| r.info.clone()) {
            self.debout
                .emit(DeboutKind::ClientDebout, &info, envelope.content);
        }
    }

    /// Announce presence or a record change to every related peer
    fn fan_out(&self, session: SessionId, kind: MessageType) {
        let Some((info, sender_enabled)) = self.registry.read_session(session, |record| {
            (
                record.info.clone(),
                record.state.options.peer_initiation_sender,
            )
        }) else {
            return;
        };
        if !sender_enabled {
            return;
        }

        let content = serde_json::to_value(&info).unwrap_or(Value::Null);
        for (other, record) in self.registry.snapshot() {
            if other == session {
                continue;
            }
            if related(
                &info,
                &record.info,
                record.state.options.peer_initiation_receiver,
            ) {
                let envelope = Envelope::new(kind, content.clone())
                    .with_name("")
                    .with_peer(info.id.clone());
                self.deliver(&record, envelope);
            }
        }
    }

    /// Announce a departure, at most once per logical peer
    pub fn fan_out_leave(&self, session: SessionId) {
        let Some((info, should_announce)) = self.registry.with_session(session, |record| {
            let should = record.state.options.peer_initiation_sender
                && !record.state.left_the_building;
            if should {
                record.state.left_the_building = true;
            }
            (record.info.clone(), should)
        }) else {
            return;
        };
        if !should_announce {
            return;
        }

        info!(peer = %info.id, "Peer leaves");
        let content = serde_json::to_value(&info).unwrap_or(Value::Null);
        for (other, record) in self.registry.snapshot() {
            if other == session {
                continue;
            }
            if related(
                &info,
                &record.info,
                record.state.options.peer_initiation_receiver,
            ) {
                let envelope = Envelope::new(MessageType::Leave, content.clone())
                    .with_name("")
                    .with_peer(info.id.clone());
                self.deliver(&record, envelope);
            }
        }
    }

    /// Heartbeat broadcast letting clients detect host-level suspension
    pub fn broadcast_nudge(&self, interval_ms: u64) {
        let time = Utc::now().timestamp_millis();
        for (_session, record) in self.registry.snapshot() {
            let envelope = Envelope::new(
                MessageType::Nudge,
                json!({ "time": time, "interval": interval_ms }),
            );
            self.deliver(&record, envelope);
        }
    }

    /// Mirror a liveness termination to debout observers
    pub(crate) fn report_termination(&self, session: SessionId) {
        if let Some(info) = self.registry.read_session(session, |r| r.info.clone()) {
            self.debout.emit(DeboutKind::Terminate, &info, Value::Null);
        }
    }

    pub(crate) fn send_to_session(&self, session: SessionId, envelope: Envelope) {
        let Some(record) = self.registry.read_session(session, |r| r.clone()) else {
            return;
        };
        self.deliver(&record, envelope);
    }

    fn deliver(&self, record: &SessionRecord, envelope: Envelope) {
        self.debout.emit(
            DeboutKind::Hub2Client,
            &record.info,
            serde_json::to_value(&envelope).unwrap_or(Value::Null),
        );
        record.send(OutboundFrame::Envelope(envelope));
    }
}

/// Accept a single string or a list of strings, anything else is empty
/// (tags arrive in both shapes)
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
