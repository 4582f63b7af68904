//! Error types for protocol operations
//!
//! Provides error types for serialization, deserialization, and envelope validation.

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur during protocol operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Malformed control request or response
    #[error("Invalid control message: {0}")]
    InvalidControlMessage(String),

    /// A field holds a value outside its domain
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
