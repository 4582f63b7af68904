//! Message streaming for interactive sessions

use crate::error::{AgentError, Result};
use crate::query::{MessageStream, decode_frame};
use crate::session::core::AgentClient;
use futures::stream::{self, StreamExt};

impl AgentClient {
    /// Stream every message the CLI sends
    ///
    /// Failures are yielded in place and the stream continues; it ends when
    /// the CLI's stdout closes. Only one receive stream may be open at a
    /// time; dropping it keeps the session alive and frees the slot.
    pub fn receive_messages(&self) -> Result<MessageStream> {
        let cursor = self
            .connected()?
            .session()
            .try_messages()
            .ok_or(AgentError::ReceiverBusy)?;

        Ok(stream::unfold(cursor, |mut cursor| async move {
            let frame = cursor.next().await?;
            Some((decode_frame(frame), cursor))
        })
        .boxed())
    }

    /// Stream messages up to and including the next Result message
    ///
    /// Ends early after the first failure. The receive slot is released as
    /// soon as the stream ends.
    pub fn receive_response(&self) -> Result<MessageStream> {
        let messages = self.receive_messages()?;

        Ok(stream::unfold(Some(messages), |messages| async move {
            let mut messages = messages?;
            let item = messages.next().await?;
            let done = match &item {
                Ok(message) => message.is_terminal(),
                Err(_) => true,
            };
            Some((item, (!done).then_some(messages)))
        })
        .boxed())
    }
}
