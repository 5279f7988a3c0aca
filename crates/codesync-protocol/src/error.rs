//! Protocol error types

use thiserror::Error;

/// Protocol-specific errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid room: {0}")]
    InvalidRoom(String),

    #[error("Message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Encode error: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Short machine-readable code sent back in `error` messages
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::InvalidJson(_) => "PARSE_ERROR",
            ProtocolError::InvalidMessage(_) => "INVALID_MESSAGE",
            ProtocolError::InvalidRoom(_) => "INVALID_ROOM",
            ProtocolError::MessageTooLarge { .. } => "TOO_LARGE",
            ProtocolError::Encode(_) => "ENCODE_ERROR",
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
