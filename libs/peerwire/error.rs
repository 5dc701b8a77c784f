use thiserror::Error;

/// Errors produced while encoding or decoding wire data
#[derive(Error, Debug)]
pub enum WireError {
    /// Envelope could not be serialized to JSON
    #[error("Failed to encode envelope: {0}")]
    Encode(serde_json::Error),

    /// Inbound frame was not a valid envelope (malformed JSON or an
    /// unknown message type)
    #[error("Failed to decode envelope: {0}")]
    Decode(serde_json::Error),

    /// Message id does not carry a recoverable base-36 timestamp
    #[error("Malformed message id: {0}")]
    MalformedId(String),
}
