//! # PeerWire
//!
//! Shared wire protocol for the peerhub presence and messaging system.
//!
//! This crate is the leaf both the hub (`peerhub`) and the client
//! (`peerlink`) build on:
//!
//! - **Message envelope**: the JSON wire unit `{type, messageId, name?,
//!   peer?, content}` with a closed, compile-time message-type catalog
//! - **Message ids**: lexicographically meaningful identifiers embedding a
//!   base-36 timestamp, so creation time can be recovered from the id alone
//! - **Peer records**: the public attributes a peer exposes to related peers
//! - **Debout**: the reserved diagnostic channel and its event kinds
//! - **Request correlation**: at-most-once matching of responses (or
//!   timeouts) to previously sent requests

pub mod correlate;
pub mod debout;
pub mod envelope;
pub mod error;
pub mod message_id;
pub mod peer_info;

pub use correlate::{PendingRequests, RequestTimeout};
pub use debout::{default_debout_selection, DeboutKind, DEBOUT_CHANNEL};
pub use envelope::{Envelope, MessageType, PeerRef};
pub use error::WireError;
pub use message_id::{creation_time, unique_id};
pub use peer_info::PeerInfo;

/// Type alias for Result with WireError
pub type Result<T> = std::result::Result<T, WireError>;
