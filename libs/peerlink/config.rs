//! Connection parameters

use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

use crate::error::LinkError;
use crate::reconnect::{FixedDelay, ReconnectionStrategy};

/// Fan-out options announced to the hub at initiation
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerOptions {
    /// Observe the diagnostic broadcast channel
    pub debout_receiver: bool,
    /// Receive presence/alter/leave announcements from related peers
    pub peer_initiation_receiver: bool,
    /// Announce own presence/changes/departure to related peers
    pub peer_initiation_sender: bool,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            debout_receiver: false,
            peer_initiation_receiver: true,
            peer_initiation_sender: true,
        }
    }
}

/// Everything a [`crate::PeerConnection`] needs to know before opening
///
/// Built with `ConnectionParams::new(url, linkage_key)` plus `with_*`
/// setters; every timing knob has the protocol default.
pub struct ConnectionParams {
    pub url: String,
    pub linkage_key: String,
    pub user_id: String,
    pub tags: Vec<String>,
    pub properties: Map<String, Value>,
    pub options: PeerOptions,
    pub debout_cluster: Option<String>,
    /// Poll cadence for sends issued while the socket is still opening
    pub resend_interval: Duration,
    /// How long such a send may wait before reporting a timeout
    pub send_timeout: Duration,
    /// Default request/response correlation timeout
    pub request_timeout: Duration,
    /// Watch for nudge silence and force a reconnect after host suspension
    pub awake_sentinel: bool,
    /// Delay policy between reconnection attempts
    pub reconnect_strategy: Box<dyn ReconnectionStrategy>,
}

impl ConnectionParams {
    pub fn new(url: impl Into<String>, linkage_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            linkage_key: linkage_key.into(),
            user_id: String::new(),
            tags: Vec::new(),
            properties: Map::new(),
            options: PeerOptions::default(),
            debout_cluster: None,
            resend_interval: Duration::from_millis(100),
            send_timeout: Duration::from_millis(30_000),
            request_timeout: Duration::from_millis(20_000),
            awake_sentinel: true,
            reconnect_strategy: Box::new(FixedDelay::default()),
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_options(mut self, options: PeerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_debout_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.debout_cluster = Some(cluster.into());
        self
    }

    pub fn with_resend_interval(mut self, interval: Duration) -> Self {
        self.resend_interval = interval;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_awake_sentinel(mut self, enabled: bool) -> Self {
        self.awake_sentinel = enabled;
        self
    }

    pub fn with_reconnect_strategy(
        mut self,
        strategy: impl ReconnectionStrategy + 'static,
    ) -> Self {
        self.reconnect_strategy = Box::new(strategy);
        self
    }

    /// A connection cannot open without a url and a linkage key
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.url.is_empty() {
            return Err(LinkError::InvalidParams("url must not be empty".to_string()));
        }
        if self.linkage_key.is_empty() {
            return Err(LinkError::LinkageKeyMissing);
        }
        Ok(())
    }
}
