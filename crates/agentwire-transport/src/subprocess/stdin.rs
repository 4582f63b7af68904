//! Child stdin writer

use crate::error::{Result, TransportError};
use crate::traits::MessageWriter;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::Mutex;

/// Serialized, closable access to the child's stdin
///
/// Each message is written and flushed under the lock, so concurrent writers
/// never interleave partial lines.
#[derive(Debug)]
pub struct StdinWriter {
    stdin: Mutex<Option<ChildStdin>>,
}

impl StdinWriter {
    pub(crate) fn new(stdin: ChildStdin) -> Self {
        Self {
            stdin: Mutex::new(Some(stdin)),
        }
    }

    /// Write raw bytes; the caller supplies framing
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::WriteAfterClose)?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Write a JSON value followed by a newline
    pub async fn write_json(&self, message: &serde_json::Value) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.write(&line).await
    }

    /// Close stdin, signalling end of input to the child
    ///
    /// Idempotent.
    pub async fn close(&self) {
        let stdin = self.stdin.lock().await.take();
        if let Some(mut stdin) = stdin {
            if let Err(err) = stdin.shutdown().await {
                tracing::debug!(error = %err, "error while closing stdin");
            }
            tracing::debug!("closed child stdin");
        }
    }

    /// Whether stdin is still open
    pub async fn is_open(&self) -> bool {
        self.stdin.lock().await.is_some()
    }
}

#[async_trait]
impl MessageWriter for StdinWriter {
    async fn write_message(&self, message: &serde_json::Value) -> Result<()> {
        self.write_json(message).await
    }
}
