//! Transport error types

use std::time::Duration;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The process could not be started (not found, permission denied, bad cwd)
    #[error("Connection error: {0}")]
    Connection(String),

    /// The process exited abnormally
    #[error("Process exited with {}: {stderr}", exit_description(.exit_code))]
    Process {
        /// Exit code, `None` when killed by a signal
        exit_code: Option<i32>,
        /// Captured stderr (possibly truncated)
        stderr: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stdout carried text that is not valid JSON
    #[error("JSON decode error: {message}")]
    Json {
        /// Parser diagnostic
        message: String,
        /// The offending text
        raw: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The frame buffer grew past its ceiling before a value completed
    #[error("JSON message exceeded maximum buffer size of {limit} bytes")]
    BufferExceeded {
        /// Configured ceiling in bytes
        limit: usize,
    },

    /// Unread stdout messages reached the queue limit; later output is
    /// dropped until the reader catches up
    #[error("Message queue full: {limit} unread messages, dropping output")]
    QueueFull {
        /// Configured limit in messages
        limit: usize,
    },

    /// Stdin has already been closed
    #[error("Cannot write: stdin is closed")]
    WriteAfterClose,

    /// No control response arrived in time
    #[error("Control request {request_id} timed out after {timeout:?}")]
    ControlTimeout {
        /// Correlation identifier
        request_id: String,
        /// The bound that was exceeded
        timeout: Duration,
    },

    /// The session ended while a control request was pending
    #[error("Control channel closed: {0}")]
    ChannelClosed(String),

    /// No pending control request has this id (never sent or already awaited)
    #[error("Unknown control request: {0}")]
    UnknownRequest(String),

    /// The CLI answered a control request with an error
    #[error("Control request {request_id} failed: {message}")]
    ControlRejected {
        /// Correlation identifier
        request_id: String,
        /// Error reported by the CLI
        message: String,
    },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "signal".to_string(),
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<agentwire_protocol::ProtocolError> for TransportError {
    fn from(err: agentwire_protocol::ProtocolError) -> Self {
        Self::Serialization(err.to_string())
    }
}
