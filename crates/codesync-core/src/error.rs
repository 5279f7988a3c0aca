//! Error types for CodeSync Core

use thiserror::Error;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid room ID: {0}")]
    InvalidRoomId(String),

    #[error("Malformed update: {0}")]
    MalformedUpdate(String),
}

/// Result type alias for CodeSync Core operations
pub type Result<T> = std::result::Result<T, Error>;
