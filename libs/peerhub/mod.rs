//! # PeerHub
//!
//! The presence and messaging hub: accepts persistent WebSocket connections
//! from distributed peers, tracks each peer's identity, tags and properties,
//! and mediates discovery, pub/sub and point-to-point request/response
//! traffic between peers sharing a linkage key.
//!
//! ## Architecture
//!
//! - **Registry**: single owner of all session records (public peer info +
//!   private session state + outbound queue)
//! - **Router**: decodes envelopes, runs the handshake, dispatches by
//!   message type and applies the relationship rule for fan-out
//! - **Liveness monitor**: ping/pong sweep and nudge heartbeat loops
//! - **Debout**: opt-in diagnostic mirror of hub and message lifecycle
//!   events
//! - **Crypting**: deterministic userId encryption collaborator
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = HubConfig::default();
//! let listener = TcpListener::bind(&config.listen_addr).await?;
//! let hub = PeerHub::new(config);
//! hub.run(listener).await;
//! ```

pub mod config;
pub mod crypting;
pub mod debout;
pub mod error;
pub mod liveness;
pub mod logging;
pub mod registry;
pub mod relation;
pub mod router;
pub mod server;
pub mod session;

pub use config::{ConfigError, HubConfig};
pub use crypting::Crypting;
pub use debout::DeboutBroadcaster;
pub use error::{HubError, Result};
pub use liveness::LivenessMonitor;
pub use registry::{PeerRegistry, SessionId};
pub use relation::related;
pub use router::HubRouter;
pub use server::PeerHub;
pub use session::{OutboundFrame, SessionOptions, SessionRecord, SessionState};
