//! Core client management
//!
//! Provides the AgentClient struct and its connection lifecycle.

use crate::config::AgentOptions;
use crate::error::{AgentError, Result};
use crate::lifecycle::SessionGuard;
use crate::prompt::{Prompt, spawn_forwarder, text_envelope};
use agentwire_transport::ProcessSession;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// An interactive client for the CLI
///
/// Starts disconnected. [`connect`](Self::connect) launches the CLI and
/// [`disconnect`](Self::disconnect) stops it; every other operation fails
/// with [`AgentError::NotConnected`] in between.
///
/// `disconnect` is the cleanup path to rely on. Dropping a connected client
/// only schedules termination in the background.
pub struct AgentClient {
    pub(crate) options: AgentOptions,
    pub(crate) session: Option<SessionGuard>,
}

impl AgentClient {
    /// Create a disconnected client
    pub fn new(options: AgentOptions) -> Self {
        Self {
            options,
            session: None,
        }
    }

    /// Options this client launches the CLI with
    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Launch the CLI, optionally sending a first prompt
    ///
    /// Without a prompt nothing is written until [`send`](Self::send).
    /// Connecting an already connected client does nothing.
    pub async fn connect(&mut self, prompt: Option<Prompt>) -> Result<()> {
        if self.session.is_some() {
            tracing::debug!("connect called while connected, ignoring");
            return Ok(());
        }

        let config = self.options.process_config()?;
        let session = ProcessSession::start(config).await?;
        tracing::debug!(pid = ?session.pid(), "client connected");
        let guard = SessionGuard::new(session);

        if let Some(prompt) = prompt {
            if let Err(err) = write_prompt(&guard, prompt).await {
                guard.close().await;
                return Err(err);
            }
        }

        self.session = Some(guard);
        Ok(())
    }

    /// Send a prompt
    ///
    /// Text is written before this returns. A stream is forwarded in the
    /// background until it ends or the client disconnects.
    pub async fn send(&self, prompt: impl Into<Prompt>) -> Result<()> {
        write_prompt(self.connected()?, prompt.into()).await
    }

    /// Send a raw stream-json message
    pub async fn send_json(&self, message: &Value) -> Result<()> {
        self.connected()?.session().write_json(message).await?;
        Ok(())
    }

    /// Stop the CLI and wait for it to exit
    ///
    /// Idempotent; never fails.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(guard) = self.session.take() {
            let exit = guard.close().await;
            tracing::debug!(%exit, "client disconnected");
        }
        Ok(())
    }

    /// Whether the client holds a CLI process
    ///
    /// Stays true after the CLI exits on its own, until
    /// [`disconnect`](Self::disconnect).
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Captured CLI stderr, bounded by the configured capacity
    pub async fn stderr_output(&self) -> Result<String> {
        Ok(self.connected()?.session().stderr_output().await)
    }

    pub(crate) fn connected(&self) -> Result<&SessionGuard> {
        self.session.as_ref().ok_or(AgentError::NotConnected)
    }
}

impl fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentClient")
            .field("options", &self.options)
            .field(
                "session",
                &self.session.as_ref().map(|guard| guard.session().pid()),
            )
            .finish()
    }
}

async fn write_prompt(guard: &SessionGuard, prompt: Prompt) -> Result<()> {
    let session = guard.session();
    match prompt {
        Prompt::Text(text) => {
            session.write_json(&text_envelope(text)?).await?;
        }
        Prompt::Stream(messages) => {
            let forwarder = spawn_forwarder(Arc::clone(session.stdin()), messages, false);
            guard.track(forwarder.abort_handle());
        }
    }
    Ok(())
}
