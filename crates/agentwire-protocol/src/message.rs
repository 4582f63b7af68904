//! Message types for the stream-json protocol
//!
//! Defines the typed messages read from the CLI's stdout and the user input
//! envelope written to its stdin.

use crate::content::MessageContent;
use serde::{Deserialize, Serialize};

/// A typed message emitted by the CLI
///
/// The set of kinds is closed. Anything else on stdout is either a control
/// message (handled by the transport) or a decode error.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// User message (prompts and tool results echoed by the CLI)
    User(UserMessage),

    /// Assistant response
    Assistant(AssistantMessage),

    /// System message (init, status)
    System(SystemMessage),

    /// Result message; terminates a response cycle
    Result(ResultMessage),
}

impl Message {
    /// Whether this message ends a response cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }

    /// Protocol discriminator for this message kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Assistant(_) => "assistant",
            Self::System(_) => "system",
            Self::Result(_) => "result",
        }
    }
}

/// A user message
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    /// Text or content blocks
    pub content: MessageContent,

    /// Tool use this message belongs to, for sub-agent traffic
    pub parent_tool_use_id: Option<String>,
}

/// An assistant message
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    /// Text or content blocks
    pub content: MessageContent,

    /// The model used to generate this message
    pub model: String,

    /// Tool use this message belongs to, for sub-agent traffic
    pub parent_tool_use_id: Option<String>,
}

/// A system message from the CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemMessage {
    /// Subtype of the system message
    pub subtype: String,

    /// The complete raw object
    pub data: serde_json::Value,
}

/// A result message indicating query completion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultMessage {
    /// Subtype of the result message
    pub subtype: String,

    /// Duration in milliseconds
    pub duration_ms: u64,

    /// API duration in milliseconds
    pub duration_api_ms: u64,

    /// Whether the result is an error
    pub is_error: bool,

    /// Number of turns in the conversation
    pub num_turns: u32,

    /// Session identifier
    pub session_id: String,

    /// Total cost in USD (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost_usd: Option<f64>,

    /// Token usage information
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,

    /// Final result text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// A user turn written to the CLI's stdin
///
/// Serializes to
/// `{"type":"user","message":{"role":"user","content":…},"parent_tool_use_id":null,"session_id":…}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserInput {
    #[serde(rename = "type")]
    message_type: &'static str,

    /// The wrapped message
    pub message: UserInputMessage,

    /// Parent tool use, always null for top-level prompts
    pub parent_tool_use_id: Option<String>,

    /// Conversation the prompt belongs to
    pub session_id: String,
}

/// Inner message of a [`UserInput`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserInputMessage {
    /// Always "user"
    pub role: &'static str,

    /// Prompt text or blocks
    pub content: MessageContent,
}

/// Session id used when the caller does not name one
pub const DEFAULT_SESSION_ID: &str = "default";

impl UserInput {
    /// Create a user turn for the default session
    pub fn new(content: impl Into<MessageContent>) -> Self {
        Self::for_session(content, DEFAULT_SESSION_ID)
    }

    /// Create a user turn for a named session
    pub fn for_session(content: impl Into<MessageContent>, session_id: impl Into<String>) -> Self {
        Self {
            message_type: "user",
            message: UserInputMessage {
                role: "user",
                content: content.into(),
            },
            parent_tool_use_id: None,
            session_id: session_id.into(),
        }
    }

    /// Convert to a JSON value
    pub fn to_value(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
