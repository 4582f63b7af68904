//! Interactive sessions with the CLI
//!
//! [`AgentClient`] keeps one CLI process alive across many turns.
//!
//! # Module Organization
//!
//! - [`core`] - Client struct, connect, send, and disconnect
//! - [`query`] - Receiving messages and response cycles
//! - [`control`] - Runtime control (interrupt, model, permission mode)
//!
//! # Example
//!
//! ```ignore
//! use agentwire::{AgentClient, AgentOptions};
//! use futures::StreamExt;
//!
//! let mut client = AgentClient::new(AgentOptions::default());
//! client.connect(None).await?;
//! client.send("What is 2+2?").await?;
//!
//! let mut response = client.receive_response()?;
//! while let Some(message) = response.next().await {
//!     println!("{:?}", message?);
//! }
//! client.disconnect().await?;
//! ```

pub mod control;
pub mod core;
pub mod query;

pub use self::core::AgentClient;
