//! Subprocess transport for CLI communication
//!
//! Spawns the CLI with piped stdio, frames its stdout into JSON values,
//! collects stderr, and exposes a control channel over the same pipes.

pub mod config;
pub mod process;
mod pump;
pub mod stdin;

pub use config::{
    DEFAULT_KILL_GRACE, DEFAULT_MAX_QUEUED_MESSAGES, DEFAULT_SHUTDOWN_TIMEOUT, ProcessConfig,
    StderrCallback,
};
pub use process::{MessageCursor, ProcessExit, ProcessSession, ProcessState};
pub use stdin::StdinWriter;
