use peerwire::RequestTimeout;
use thiserror::Error;

/// Main error type for the client connection
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// `open()` requires a linkage key
    #[error("Linkage key not specified")]
    LinkageKeyMissing,

    /// Fatal misconfiguration: the endpoint does not exist (bad url, 404)
    #[error("Invalid WebSocket url '{0}' (not found)")]
    NotFound(String),

    /// The hub refused the connection; the client will keep reconnecting
    #[error("Connection refused")]
    ConnectionRefused,

    /// A send waited for the socket to finish opening and gave up
    #[error("Connection timed out while opening")]
    ConnectionTimeout,

    /// A request expired without a response
    #[error("Request timed out: {0}")]
    Request(#[from] RequestTimeout),

    /// Operation needs an open (or opening) socket
    #[error("Not connected")]
    Unconnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Malformed inbound frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// Caller-supplied parameters were rejected
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, LinkError>;
