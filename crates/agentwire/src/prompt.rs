//! Prompts accepted by `query`, `connect`, and `send`

use agentwire_protocol::UserInput;
use agentwire_transport::StdinWriter;
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Input for the CLI
///
/// Text is wrapped in a user message envelope. A stream is forwarded as-is,
/// one JSON value per line, by a background task.
pub enum Prompt {
    /// A single user turn
    Text(String),

    /// Raw stream-json messages
    Stream(BoxStream<'static, Value>),
}

impl Prompt {
    /// Prompt from any stream of raw messages
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        Self::Stream(stream.boxed())
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

/// User message envelope for a text prompt
pub(crate) fn text_envelope(text: String) -> crate::Result<Value> {
    Ok(UserInput::new(text).to_value()?)
}

/// Forward a prompt stream to stdin, optionally closing it afterwards
pub(crate) fn spawn_forwarder(
    stdin: Arc<StdinWriter>,
    mut messages: BoxStream<'static, Value>,
    close_when_done: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut forwarded = 0usize;
        while let Some(message) = messages.next().await {
            if let Err(err) = stdin.write_json(&message).await {
                tracing::warn!(error = %err, forwarded, "prompt stream stopped: stdin write failed");
                return;
            }
            forwarded += 1;
        }
        tracing::debug!(forwarded, "prompt stream finished");
        if close_when_done {
            stdin.close().await;
        }
    })
}
