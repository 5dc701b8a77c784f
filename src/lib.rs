//! PeerHub Suite - Main Library
//!
//! This crate ties the workspace together: the hub server (`peerhub`), the
//! client protocol library (`peerlink`) and the shared wire protocol
//! (`peerwire`), plus the common utilities the binaries use.
//!
//! ## Usage in Binaries
//!
//! ```rust,ignore
//! use peerhub_suite::bin_common::{load_config_from_env, ConfigType};
//! use peerhub_suite::peerhub::{HubConfig, PeerHub};
//! ```

// Re-export workspace libraries for convenience
pub use peerhub;
pub use peerlink;
pub use peerwire;

// Binary common utilities
pub mod bin_common {
    //! Common utilities for binary executables

    pub mod cli;

    pub use cli::{load_config_from_env, parse_args, ConfigType};
}
