//! Error types for a3s-bridge

use thiserror::Error;

/// Errors that can occur in the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Event source connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Read failure on an established event stream
    #[error("Stream error: {0}")]
    Stream(String),

    /// A single event frame could not be decoded
    #[error("Failed to decode '{kind}' event: {reason}")]
    Decode {
        kind: String,
        reason: String,
    },

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote agent service rejected or failed a request
    #[error("Agent error: {0}")]
    Agent(String),

    /// The presentation collaborator failed to deliver output
    #[error("Presentation error: {0}")]
    Presentation(String),

    /// An edit carried the same content as the message already shows
    #[error("Message is not modified")]
    MessageNotModified,

    /// Unknown or expired reference
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Component already closed or consumed
    #[error("Closed: {0}")]
    Closed(String),
}

impl BridgeError {
    /// Whether this error only reports that an edit changed nothing
    pub fn is_not_modified(&self) -> bool {
        match self {
            BridgeError::MessageNotModified => true,
            BridgeError::Presentation(reason) => reason.contains("message is not modified"),
            _ => false,
        }
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
