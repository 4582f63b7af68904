//! Runtime control methods
//!
//! Each method sends one control request and waits for the CLI's answer,
//! bounded by the configured control timeout.

use crate::error::Result;
use crate::session::core::AgentClient;
use agentwire_protocol::{ControlCommand, PermissionMode};
use serde_json::Value;

impl AgentClient {
    /// Interrupt the running turn
    ///
    /// Fails with a timeout if the CLI does not acknowledge in time; the
    /// process is left running.
    pub async fn interrupt(&self) -> Result<()> {
        self.control(ControlCommand::Interrupt).await?;
        Ok(())
    }

    /// Change the model; `None` restores the CLI default
    pub async fn set_model(&self, model: Option<String>) -> Result<()> {
        self.control(ControlCommand::SetModel { model }).await?;
        Ok(())
    }

    /// Change the permission mode
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.control(ControlCommand::SetPermissionMode { mode }).await?;
        Ok(())
    }

    async fn control(&self, command: ControlCommand) -> Result<Value> {
        let guard = self.connected()?;
        let payload = command.to_payload()?;
        tracing::debug!(?command, "sending control command");

        let response = guard
            .session()
            .control()
            .request(payload, self.options.control_timeout)
            .await?;
        Ok(response)
    }
}
