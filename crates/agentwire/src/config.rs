//! Agent client configuration
//!
//! [`AgentOptions`] describes how to launch the CLI. Two collaborators turn it
//! into a process: a [`CliLocator`] finds the executable and an
//! [`ArgumentBuilder`] produces its command line. Both are traits so callers
//! can swap them out; the defaults search `PATH` and emit the stream-json
//! flag set.

use crate::error::{AgentError, Result};
use agentwire_protocol::PermissionMode;
use agentwire_transport::{
    DEFAULT_MAX_BUFFER_SIZE, DEFAULT_STDERR_CAPACITY, ProcessConfig, StderrCallback,
};
use agentwire_transport::subprocess::{DEFAULT_MAX_QUEUED_MESSAGES, DEFAULT_SHUTDOWN_TIMEOUT};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Executable name searched for on `PATH`
pub const DEFAULT_CLI_NAME: &str = "claude";

/// Default wait for a control response
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable telling the CLI which client launched it
pub const ENTRYPOINT_ENV: &str = "CLAUDE_CODE_ENTRYPOINT";

const ENTRYPOINT: &str = "sdk-rust";

/// Finds the CLI executable
pub trait CliLocator: Send + Sync {
    /// Path of the executable to launch
    fn locate(&self) -> Result<PathBuf>;
}

/// Builds the CLI command line from options
pub trait ArgumentBuilder: Send + Sync {
    /// Arguments, not including the executable
    fn build(&self, options: &AgentOptions) -> Vec<String>;
}

/// Default locator: an explicit path, else a `PATH` search
#[derive(Debug, Clone, Default)]
pub struct PathLocator {
    explicit: Option<PathBuf>,
    name: Option<String>,
}

impl PathLocator {
    /// Search `PATH` for [`DEFAULT_CLI_NAME`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `path` without searching
    ///
    /// The path is not checked here; a missing file surfaces as a connection
    /// error when the process starts.
    pub fn explicit(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit: Some(path.into()),
            name: None,
        }
    }

    /// Search `PATH` for a different executable name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            explicit: None,
            name: Some(name.into()),
        }
    }
}

impl CliLocator for PathLocator {
    fn locate(&self) -> Result<PathBuf> {
        if let Some(path) = &self.explicit {
            return Ok(path.clone());
        }

        let name = self.name.as_deref().unwrap_or(DEFAULT_CLI_NAME);
        let found = std::env::var_os("PATH").and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|candidate| candidate.is_file())
        });

        match found {
            Some(path) => {
                tracing::debug!(path = %path.display(), "located CLI on PATH");
                Ok(path)
            }
            None => Err(AgentError::CliNotFound(format!(
                "{} not found on PATH; install it or set cli_path",
                name
            ))),
        }
    }
}

/// Default argument builder for stream-json mode
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamJsonArgs;

impl ArgumentBuilder for StreamJsonArgs {
    fn build(&self, options: &AgentOptions) -> Vec<String> {
        let mut args: Vec<String> = [
            "--output-format",
            "stream-json",
            "--verbose",
            "--input-format",
            "stream-json",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if let Some(model) = &options.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        if let Some(prompt) = &options.system_prompt {
            args.extend(["--system-prompt".to_string(), prompt.clone()]);
        }
        if let Some(mode) = options.permission_mode {
            args.extend(["--permission-mode".to_string(), mode.to_string()]);
        }
        if let Some(turns) = options.max_turns {
            args.extend(["--max-turns".to_string(), turns.to_string()]);
        }
        if !options.allowed_tools.is_empty() {
            args.extend(["--allowedTools".to_string(), options.allowed_tools.join(",")]);
        }
        for (flag, value) in &options.extra_args {
            args.push(format!("--{}", flag.trim_start_matches('-')));
            if let Some(value) = value {
                args.push(value.clone());
            }
        }
        args
    }
}

/// Options for launching and talking to the CLI
#[derive(Clone)]
pub struct AgentOptions {
    /// Explicit CLI path; searched on `PATH` when unset
    pub cli_path: Option<PathBuf>,

    /// Working directory for the CLI
    pub cwd: Option<PathBuf>,

    /// Extra environment variables for the CLI
    pub env: HashMap<String, String>,

    /// Model to use
    pub model: Option<String>,

    /// System prompt
    pub system_prompt: Option<String>,

    /// Permission mode for tool use
    pub permission_mode: Option<PermissionMode>,

    /// Maximum conversation turns
    pub max_turns: Option<u32>,

    /// Tools the CLI may use without asking
    pub allowed_tools: Vec<String>,

    /// Additional `--flag [value]` pairs, in order
    pub extra_args: Vec<(String, Option<String>)>,

    /// Ceiling for a single stdout message
    pub max_buffer_size: usize,

    /// Unread messages held before output is dropped
    pub max_queued_messages: usize,

    /// Bytes of stderr kept for error reports
    pub stderr_capacity: usize,

    /// Wait for a control response before failing
    pub control_timeout: Duration,

    /// Wait after closing stdin before escalating shutdown
    pub shutdown_timeout: Duration,

    /// Receives CLI stderr lines as they arrive
    pub stderr_callback: Option<StderrCallback>,

    locator: Option<Arc<dyn CliLocator>>,
    argument_builder: Option<Arc<dyn ArgumentBuilder>>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            cli_path: None,
            cwd: None,
            env: HashMap::new(),
            model: None,
            system_prompt: None,
            permission_mode: None,
            max_turns: None,
            allowed_tools: Vec::new(),
            extra_args: Vec::new(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
            stderr_capacity: DEFAULT_STDERR_CAPACITY,
            control_timeout: DEFAULT_CONTROL_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            stderr_callback: None,
            locator: None,
            argument_builder: None,
        }
    }
}

impl fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentOptions")
            .field("cli_path", &self.cli_path)
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt.is_some())
            .field("permission_mode", &self.permission_mode)
            .field("max_turns", &self.max_turns)
            .field("allowed_tools", &self.allowed_tools)
            .field("extra_args", &self.extra_args)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("max_queued_messages", &self.max_queued_messages)
            .field("stderr_capacity", &self.stderr_capacity)
            .field("control_timeout", &self.control_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("stderr_callback", &self.stderr_callback.is_some())
            .field("custom_locator", &self.locator.is_some())
            .field("custom_argument_builder", &self.argument_builder.is_some())
            .finish()
    }
}

impl AgentOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CLI path
    pub fn with_cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cli_path = Some(path.into());
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set an environment variable for the CLI
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set the permission mode
    pub fn with_permission_mode(mut self, mode: PermissionMode) -> Self {
        self.permission_mode = Some(mode);
        self
    }

    /// Set the maximum number of turns
    pub fn with_max_turns(mut self, turns: u32) -> Self {
        self.max_turns = Some(turns);
        self
    }

    /// Allow a tool without prompting
    pub fn with_allowed_tool(mut self, tool: impl Into<String>) -> Self {
        self.allowed_tools.push(tool.into());
        self
    }

    /// Pass an extra flag, with or without a value
    pub fn with_extra_arg(mut self, flag: impl Into<String>, value: Option<String>) -> Self {
        self.extra_args.push((flag.into(), value));
        self
    }

    /// Set the stdout message ceiling in bytes
    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    /// Set how many unread messages are held before output is dropped
    pub fn with_max_queued_messages(mut self, limit: usize) -> Self {
        self.max_queued_messages = limit;
        self
    }

    /// Set how many bytes of stderr are kept
    pub fn with_stderr_capacity(mut self, bytes: usize) -> Self {
        self.stderr_capacity = bytes;
        self
    }

    /// Set the control response timeout
    pub fn with_control_timeout(mut self, timeout: Duration) -> Self {
        self.control_timeout = timeout;
        self
    }

    /// Set the graceful shutdown wait
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Register a stderr line callback
    pub fn with_stderr_callback(mut self, callback: StderrCallback) -> Self {
        self.stderr_callback = Some(callback);
        self
    }

    /// Replace the executable locator
    pub fn with_locator(mut self, locator: Arc<dyn CliLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Replace the argument builder
    pub fn with_argument_builder(mut self, builder: Arc<dyn ArgumentBuilder>) -> Self {
        self.argument_builder = Some(builder);
        self
    }

    /// Check values that would only fail later, mid-session
    pub fn validate(&self) -> Result<()> {
        if self.max_turns == Some(0) {
            return Err(AgentError::Config("max_turns must be > 0".into()));
        }
        if self.max_buffer_size == 0 {
            return Err(AgentError::Config("max_buffer_size must be > 0".into()));
        }
        if self.max_queued_messages == 0 {
            return Err(AgentError::Config("max_queued_messages must be > 0".into()));
        }
        if self.control_timeout.is_zero() {
            return Err(AgentError::Config("control_timeout must be > 0".into()));
        }
        Ok(())
    }

    /// Resolve the executable and build the transport configuration
    pub fn process_config(&self) -> Result<ProcessConfig> {
        self.validate()?;

        let program = match (&self.locator, &self.cli_path) {
            (Some(locator), _) => locator.locate()?,
            (None, Some(path)) => PathLocator::explicit(path).locate()?,
            (None, None) => PathLocator::new().locate()?,
        };
        let args = match &self.argument_builder {
            Some(builder) => builder.build(self),
            None => StreamJsonArgs.build(self),
        };

        let mut config = ProcessConfig::new(program)
            .with_args(args)
            .with_env(ENTRYPOINT_ENV, ENTRYPOINT)
            .with_max_buffer_size(self.max_buffer_size)
            .with_max_queued_messages(self.max_queued_messages)
            .with_stderr_capacity(self.stderr_capacity)
            .with_shutdown_timeout(self.shutdown_timeout);
        for (key, value) in &self.env {
            config = config.with_env(key.clone(), value.clone());
        }
        if let Some(cwd) = &self.cwd {
            config = config.with_cwd(cwd.clone());
        }
        if let Some(callback) = &self.stderr_callback {
            config = config.with_stderr_callback(callback.clone());
        }
        Ok(config)
    }
}
