//! Protocol types for driving an agent CLI over stdio
//!
//! This crate provides the data types exchanged with the CLI in its
//! `stream-json` mode. Both the transport (`agentwire-transport`) and the
//! client (`agentwire`) depend on it.
//!
//! # Type Organization
//!
//! - **Content types**: [`content`] - Text, tool use/results, message content
//! - **Message types**: [`message`] - Typed messages and the user input envelope
//! - **Control protocol**: [`control`] - Control requests, responses, commands
//! - **Common types**: [`types`] - Permission modes
//! - **Error types**: [`error`] - Envelope errors
//!
//! # Design Principles
//!
//! - **Zero I/O**: All types are pure data structures
//! - **Serialization**: serde-based JSON

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod content;
pub mod control;
pub mod error;
pub mod message;
pub mod types;

// Re-export commonly used types at crate level
pub use content::{ContentBlock, MessageContent};
pub use control::{
    CONTROL_REQUEST, CONTROL_RESPONSE, ControlCommand, ControlRequest, ControlResponse,
    is_control_request, is_control_response, message_type,
};
pub use error::{ProtocolError, Result};
pub use message::{
    AssistantMessage, DEFAULT_SESSION_ID, Message, ResultMessage, SystemMessage, UserInput,
    UserMessage,
};
pub use types::PermissionMode;
