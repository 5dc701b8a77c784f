//! # PeerLink
//!
//! Client protocol library for the peerhub presence and messaging system.
//!
//! A [`PeerConnection`] maintains one socket to a hub, mirrors the related
//! peers it learns about, correlates requests with asynchronous responses,
//! reconnects after abnormal closes, and watches the hub's nudge heartbeat
//! to force a reconnect after host-level suspension (laptop sleep).
//!
//! ## Example
//!
//! ```rust,ignore
//! let params = ConnectionParams::new("ws://hub.example.org:9190", "my-linkage-key")
//!     .with_user_id("alice")
//!     .with_tags(vec!["worker".to_string()]);
//! let connection = PeerConnection::new(params);
//! connection.open()?;
//!
//! while let Ok(event) = connection.recv_event() {
//!     match event {
//!         LinkEvent::AddPeer(peer) => println!("peer appeared: {}", peer.id),
//!         LinkEvent::Request(request) => {
//!             connection.respond(
//!                 request.peer.as_deref().unwrap_or_default(),
//!                 &request.message_id,
//!                 request.name.as_deref(),
//!                 serde_json::json!({"ok": true}),
//!             )?;
//!         }
//!         _ => {}
//!     }
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod mirror;
pub mod reconnect;
pub mod sentinel;
pub mod state;

pub use config::{ConnectionParams, PeerOptions};
pub use connection::PeerConnection;
pub use error::{LinkError, Result};
pub use events::{IncomingMessage, LinkEvent};
pub use mirror::{MirrorEvent, PeerMirror};
pub use reconnect::{ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionStrategy};
pub use sentinel::NudgeTracker;
pub use state::{AtomicLinkMetrics, AtomicLinkState, LinkMetrics, LinkState};
