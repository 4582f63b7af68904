//! Configuration for spawning the CLI process

use crate::framing::DEFAULT_MAX_BUFFER_SIZE;
use crate::stderr::DEFAULT_STDERR_CAPACITY;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Callback invoked with each line the child writes to stderr
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Default wait after closing stdin before signalling the child
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of unread stdout messages held for the caller
pub const DEFAULT_MAX_QUEUED_MESSAGES: usize = 10_000;

/// Default wait after SIGTERM before killing the child
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(1);

/// Configuration for spawning a CLI process
#[derive(Clone)]
pub struct ProcessConfig {
    /// Path to the executable
    pub program: PathBuf,

    /// Arguments, passed through untouched
    pub args: Vec<String>,

    /// Working directory; inherits the parent's when unset
    pub cwd: Option<PathBuf>,

    /// Environment variables to set
    pub env: HashMap<String, String>,

    /// Start the child with an empty environment plus `env`
    pub clear_env: bool,

    /// Ceiling for a single buffered stdout message
    pub max_buffer_size: usize,

    /// Unread stdout messages held before output is dropped
    pub max_queued_messages: usize,

    /// Bytes of stderr kept for error reports
    pub stderr_capacity: usize,

    /// Wait after closing stdin before escalating
    pub shutdown_timeout: Duration,

    /// Wait after SIGTERM before killing
    pub kill_grace: Duration,

    /// Receives stderr lines as they arrive
    pub stderr_callback: Option<StderrCallback>,
}

impl fmt::Debug for ProcessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessConfig")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("clear_env", &self.clear_env)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("max_queued_messages", &self.max_queued_messages)
            .field("stderr_capacity", &self.stderr_capacity)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("kill_grace", &self.kill_grace)
            .field("stderr_callback", &self.stderr_callback.is_some())
            .finish()
    }
}

impl ProcessConfig {
    /// Create a configuration for `program` with no arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            clear_env: false,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_queued_messages: DEFAULT_MAX_QUEUED_MESSAGES,
            stderr_capacity: DEFAULT_STDERR_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            kill_grace: DEFAULT_KILL_GRACE,
            stderr_callback: None,
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Clear the inherited environment
    ///
    /// Only the variables set with [`with_env`](Self::with_env) reach the
    /// child.
    pub fn with_clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    /// Set the stdout message ceiling in bytes
    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    /// Set how many unread messages are held for the caller
    pub fn with_max_queued_messages(mut self, limit: usize) -> Self {
        self.max_queued_messages = limit;
        self
    }

    /// Set how many bytes of stderr are kept
    pub fn with_stderr_capacity(mut self, bytes: usize) -> Self {
        self.stderr_capacity = bytes;
        self
    }

    /// Set the graceful shutdown wait
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the wait between SIGTERM and kill
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Register a stderr line callback
    pub fn with_stderr_callback(mut self, callback: StderrCallback) -> Self {
        self.stderr_callback = Some(callback);
        self
    }
}
