//! Subprocess stdio transport for agent CLIs
//!
//! Drives a CLI that speaks newline-delimited JSON over stdin and stdout.
//!
//! # Architecture
//!
//! - **Framing**: [`FramedReader`] turns arbitrary stdout chunks into JSON values
//! - **Process session**: [`ProcessSession`] owns the child, its pipes, and its shutdown
//! - **Control channel**: [`ControlChannel`] correlates control requests with responses
//! - **Stderr capture**: [`StderrCapture`] keeps a bounded tail for error reports
//!
//! # Usage
//!
//! ```ignore
//! use agentwire_transport::{ProcessConfig, ProcessSession};
//!
//! let session = ProcessSession::start(
//!     ProcessConfig::new("claude").with_args(["--output-format", "stream-json"]),
//! )
//! .await?;
//! let mut messages = session.messages().await;
//! while let Some(message) = messages.next().await {
//!     println!("{}", message?);
//! }
//! session.terminate().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod error;
pub mod framing;
pub mod stderr;
pub mod subprocess;
pub mod traits;

pub use control::ControlChannel;
pub use error::{Result, TransportError};
pub use framing::{DEFAULT_MAX_BUFFER_SIZE, FramedReader};
pub use stderr::{DEFAULT_STDERR_CAPACITY, StderrCapture};
pub use subprocess::{
    MessageCursor, ProcessConfig, ProcessExit, ProcessSession, ProcessState, StderrCallback,
    StdinWriter,
};
pub use traits::MessageWriter;
