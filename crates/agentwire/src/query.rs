//! One-shot queries
//!
//! [`query`] starts the CLI, writes a single prompt, closes stdin, and streams
//! decoded messages until the CLI exits. The session is torn down exactly
//! once: after the last message, after the first failure, or in the
//! background when the stream is dropped early.

use crate::config::AgentOptions;
use crate::error::{AgentError, Result};
use crate::lifecycle::SessionGuard;
use crate::message_parser::parse_message;
use crate::prompt::{Prompt, spawn_forwarder, text_envelope};
use agentwire_protocol::Message;
use agentwire_transport::{MessageCursor, ProcessSession, TransportError};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use std::io;
use std::sync::Arc;

/// Stream of decoded messages
pub type MessageStream = BoxStream<'static, Result<Message>>;

/// Run a single prompt and stream the CLI's messages
///
/// Nothing happens until the stream is first polled. Launch failures are
/// yielded as the stream's only item.
///
/// # Example
///
/// ```ignore
/// use agentwire::{AgentOptions, Message, query};
/// use futures::StreamExt;
///
/// let mut messages = query("What is 2+2?", AgentOptions::default());
/// while let Some(message) = messages.next().await {
///     if let Message::Result(result) = message? {
///         println!("{:?}", result.result);
///     }
/// }
/// ```
pub fn query(prompt: impl Into<Prompt>, options: AgentOptions) -> MessageStream {
    let state = QueryState::Pending {
        prompt: prompt.into(),
        options,
    };
    stream::unfold(state, advance).boxed()
}

enum QueryState {
    Pending {
        prompt: Prompt,
        options: AgentOptions,
    },
    Streaming(Running),
    Done,
}

struct Running {
    guard: SessionGuard,
    cursor: MessageCursor,
}

async fn advance(state: QueryState) -> Option<(Result<Message>, QueryState)> {
    let running = match state {
        QueryState::Pending { prompt, options } => match open(prompt, options).await {
            Ok(running) => running,
            Err(err) => return Some((Err(err), QueryState::Done)),
        },
        QueryState::Streaming(running) => running,
        QueryState::Done => return None,
    };
    running.next().await
}

impl Running {
    async fn next(mut self) -> Option<(Result<Message>, QueryState)> {
        let Some(frame) = self.cursor.next().await else {
            self.finish().await;
            return None;
        };
        match decode_frame(frame) {
            Ok(message) => Some((Ok(message), QueryState::Streaming(self))),
            Err(err) => {
                self.finish().await;
                Some((Err(err), QueryState::Done))
            }
        }
    }

    async fn finish(self) {
        let Running { guard, cursor } = self;
        drop(cursor);
        guard.close().await;
    }
}

async fn open(prompt: Prompt, options: AgentOptions) -> Result<Running> {
    let config = options.process_config()?;
    tracing::debug!(program = %config.program.display(), "starting one-shot query");

    let guard = SessionGuard::new(ProcessSession::start(config).await?);
    let session = Arc::clone(guard.session());

    match prompt {
        Prompt::Text(text) => {
            let sent = match text_envelope(text) {
                Ok(envelope) => session.write_json(&envelope).await.map_err(AgentError::from),
                Err(err) => Err(err),
            };
            match sent {
                Ok(()) => {}
                // The exit report that follows says why the CLI went away
                Err(AgentError::Transport(TransportError::Io(err)))
                    if err.kind() == io::ErrorKind::BrokenPipe =>
                {
                    tracing::debug!("CLI closed stdin before the prompt was written");
                }
                Err(err) => {
                    guard.close().await;
                    return Err(err);
                }
            }
            session.close_stdin().await;
        }
        Prompt::Stream(messages) => {
            let forwarder = spawn_forwarder(Arc::clone(session.stdin()), messages, true);
            guard.track(forwarder.abort_handle());
        }
    }

    let cursor = session.messages().await;
    Ok(Running { guard, cursor })
}

/// Decode one stdout frame into a message
pub(crate) fn decode_frame(frame: agentwire_transport::Result<Value>) -> Result<Message> {
    let value = frame?;
    tracing::trace!(
        message_type = ?agentwire_protocol::message_type(&value),
        "received message"
    );
    Ok(parse_message(value)?)
}
