//! Drive an agent CLI from Rust
//!
//! Talks to a CLI such as `claude` over its `stream-json` mode: newline
//! delimited JSON on stdin and stdout, with control requests multiplexed onto
//! the same pipes.
//!
//! # Key Features
//!
//! - **One-shot queries**: [`query`] runs a single prompt and streams the reply
//! - **Interactive sessions**: [`AgentClient`] keeps the CLI alive across turns
//! - **Runtime control**: Interrupt, change model, or change permission mode mid-turn
//! - **Typed messages**: Stdout values decode into [`Message`]
//!
//! # Architecture
//!
//! 1. **Protocol Layer** (`agentwire-protocol`): Shared message types
//! 2. **Transport Layer** (`agentwire-transport`): Subprocess communication
//! 3. **Agent Layer** (this crate): Decoding, configuration, and the client API
//!
//! # Usage Example
//!
//! ```ignore
//! use agentwire::{AgentOptions, Message, query};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> agentwire::Result<()> {
//!     let mut messages = query("What is 2+2?", AgentOptions::default());
//!     while let Some(message) = messages.next().await {
//!         if let Message::Result(result) = message? {
//!             println!("{}", result.result.unwrap_or_default());
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
mod lifecycle;
pub mod message_parser;
pub mod prompt;
pub mod query;
pub mod session;

// Re-export commonly used types
pub use config::{
    AgentOptions, ArgumentBuilder, CliLocator, DEFAULT_CONTROL_TIMEOUT, PathLocator,
    StreamJsonArgs,
};
pub use error::{AgentError, Result};
pub use message_parser::{MessageParseError, ParseErrorKind, parse_message, parse_message_str};
pub use prompt::Prompt;
pub use query::{MessageStream, query};
pub use session::AgentClient;

pub use agentwire_protocol::{
    AssistantMessage, ContentBlock, Message, MessageContent, PermissionMode, ResultMessage,
    SystemMessage, UserMessage,
};
pub use agentwire_transport::TransportError;
