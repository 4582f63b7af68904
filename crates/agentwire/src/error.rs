//! Error types for the agent client

use crate::message_parser::MessageParseError;
use agentwire_transport::TransportError;

/// Result type for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that can occur in agent operations
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// Subprocess communication failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A stdout value was not a recognizable message
    #[error("Parse error: {0}")]
    Parse(#[from] MessageParseError),

    /// The operation needs a connected client
    #[error("Not connected; call connect() first")]
    NotConnected,

    /// Another receive stream is still active
    #[error("Another receiver is already reading messages")]
    ReceiverBusy,

    /// No CLI executable could be located
    #[error("CLI not found: {0}")]
    CliNotFound(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AgentError {
    /// Whether this is a control request timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Transport(TransportError::ControlTimeout { .. })
        )
    }

    /// Captured stderr when the CLI exited abnormally
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Transport(TransportError::Process { stderr, .. }) => Some(stderr),
            _ => None,
        }
    }
}

impl From<agentwire_protocol::ProtocolError> for AgentError {
    fn from(err: agentwire_protocol::ProtocolError) -> Self {
        Self::Transport(err.into())
    }
}
