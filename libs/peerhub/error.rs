use thiserror::Error;

/// Main error type for the hub
#[derive(Error, Debug)]
pub enum HubError {
    /// Socket accept or bind failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound frame could not be understood
    #[error("Protocol error: {0}")]
    Protocol(#[from] peerwire::WireError),

    /// UserId encryption or decryption failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Outbound queue for a session was closed or full
    #[error("Send error: {0}")]
    Send(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for hub operations
pub type Result<T> = std::result::Result<T, HubError>;
