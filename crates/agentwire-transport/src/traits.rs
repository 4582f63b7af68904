//! Transport traits
//!
//! The control channel writes through [`MessageWriter`] rather than holding the
//! child's stdin directly, so it can be driven by any sink.

use crate::error::Result;
use async_trait::async_trait;

/// Sink for newline-delimited JSON messages
#[async_trait]
pub trait MessageWriter: Send + Sync {
    /// Serialize `message` and write it followed by a newline
    async fn write_message(&self, message: &serde_json::Value) -> Result<()>;
}
