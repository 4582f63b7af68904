//! Common types shared across the protocol

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Permission mode for tool execution
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    /// Default: ask for permission for each tool use
    #[default]
    Default,

    /// Automatically accept edits without asking
    AcceptEdits,

    /// Plan only; do not execute tools
    Plan,

    /// Bypass permission checks entirely
    BypassPermissions,
}

impl PermissionMode {
    /// Wire name, as passed to `--permission-mode`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = crate::ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "acceptEdits" => Ok(Self::AcceptEdits),
            "plan" => Ok(Self::Plan),
            "bypassPermissions" => Ok(Self::BypassPermissions),
            other => Err(crate::ProtocolError::InvalidValue(format!(
                "unknown permission mode: {}",
                other
            ))),
        }
    }
}
