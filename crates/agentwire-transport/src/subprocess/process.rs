//! Process management for the CLI subprocess

use super::config::ProcessConfig;
use super::pump::{StdoutPump, pump_stderr, wait_exit, wait_for_exit};
use super::stdin::StdinWriter;
use crate::control::ControlChannel;
use crate::error::{Result, TransportError};
use crate::framing::FramedReader;
use crate::stderr::StderrCapture;
use serde_json::Value;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::Instant;

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ProcessExit {
    pub(crate) fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }

    pub(crate) fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    /// Exit code, absent when killed by a signal
    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Terminating signal on unix
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    /// Whether the process exited with code 0
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => f.write_str("unknown status"),
        }
    }
}

/// Lifecycle of a spawned process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Still running
    Running,
    /// Exited, on its own or because it was terminated
    Terminated(ProcessExit),
}

type MessageQueue = mpsc::UnboundedReceiver<Result<Value>>;

/// Exclusive read access to a session's stdout messages
///
/// Only one cursor exists at a time; dropping it releases the stream for
/// the next reader without losing queued messages.
pub struct MessageCursor {
    queue: OwnedMutexGuard<MessageQueue>,
    queued: Arc<AtomicUsize>,
}

impl MessageCursor {
    /// Next decoded stdout value, or `None` once stdout has closed and the
    /// exit has been reported
    pub async fn next(&mut self) -> Option<Result<Value>> {
        let message = self.queue.recv().await?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(message)
    }
}

impl fmt::Debug for MessageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageCursor").finish_non_exhaustive()
    }
}

/// Handle to a running CLI process
///
/// Spawning starts three background tasks: the stdout reader feeding the
/// message queue and the control channel, the stderr collector, and the
/// exit waiter. Writes go straight to stdin under a lock.
///
/// Dropping a session kills the child if it is still running.
pub struct ProcessSession {
    pid: Option<u32>,
    program: PathBuf,
    stdin: Arc<StdinWriter>,
    control: Arc<ControlChannel>,
    messages: Arc<Mutex<MessageQueue>>,
    queued: Arc<AtomicUsize>,
    stderr: Arc<Mutex<StderrCapture>>,
    exit: watch::Receiver<Option<ProcessExit>>,
    kill: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    tasks: Vec<AbortHandle>,
    shutdown_timeout: Duration,
    kill_grace: Duration,
}

impl ProcessSession {
    /// Spawn the process with piped stdio
    ///
    /// Fails with [`TransportError::Connection`] when the working directory
    /// does not exist or the executable cannot be launched.
    pub async fn start(config: ProcessConfig) -> Result<Self> {
        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args);

        if config.clear_env {
            cmd.env_clear();
        }
        cmd.envs(&config.env);

        if let Some(cwd) = &config.cwd {
            if !cwd.is_dir() {
                return Err(TransportError::Connection(format!(
                    "working directory does not exist: {}",
                    cwd.display()
                )));
            }
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| spawn_error(&config.program, err))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Connection("failed to open stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Connection("failed to open stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Connection("failed to open stderr".to_string()))?;

        tracing::debug!(pid = ?pid, program = %config.program.display(), "spawned process");

        let stdin = Arc::new(StdinWriter::new(stdin));
        let control = Arc::new(ControlChannel::new(stdin.clone()));

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(wait_for_exit(child, kill_rx, exit_tx));

        let capture = Arc::new(Mutex::new(StderrCapture::new(config.stderr_capacity)));
        let stderr_task = tokio::spawn(pump_stderr(
            stderr,
            capture.clone(),
            config.stderr_callback.clone(),
        ));

        let (messages_tx, messages_rx) = mpsc::unbounded_channel();
        let queued = Arc::new(AtomicUsize::new(0));
        let stderr_abort = stderr_task.abort_handle();
        let stdout_task = tokio::spawn(
            StdoutPump {
                stdout,
                reader: FramedReader::with_max_buffer_size(config.max_buffer_size),
                control: control.clone(),
                stdin: stdin.clone(),
                messages: messages_tx,
                queued: queued.clone(),
                max_queued: config.max_queued_messages,
                overflowing: false,
                stderr: capture.clone(),
                stderr_task,
                exit: exit_rx.clone(),
            }
            .run(),
        );

        let tasks = vec![stdout_task.abort_handle(), stderr_abort];

        Ok(Self {
            pid,
            program: config.program,
            stdin,
            control,
            messages: Arc::new(Mutex::new(messages_rx)),
            queued,
            stderr: capture,
            exit: exit_rx,
            kill: std::sync::Mutex::new(Some(kill_tx)),
            tasks,
            shutdown_timeout: config.shutdown_timeout,
            kill_grace: config.kill_grace,
        })
    }

    /// OS process id, if the child was still running at spawn time
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Executable this session launched
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Write raw bytes to stdin
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        self.stdin.write(bytes).await
    }

    /// Write a JSON value as one stdin line
    pub async fn write_json(&self, message: &Value) -> Result<()> {
        self.stdin.write_json(message).await
    }

    /// Close stdin; later writes fail with [`TransportError::WriteAfterClose`]
    pub async fn close_stdin(&self) {
        self.stdin.close().await;
    }

    /// Shared stdin writer, for tasks that outlive a borrow of the session
    pub fn stdin(&self) -> &Arc<StdinWriter> {
        &self.stdin
    }

    /// Control channel bound to this process's stdin and stdout
    pub fn control(&self) -> &Arc<ControlChannel> {
        &self.control
    }

    /// Take the message stream if no other reader holds it
    pub fn try_messages(&self) -> Option<MessageCursor> {
        self.messages
            .clone()
            .try_lock_owned()
            .ok()
            .map(|queue| MessageCursor {
                queue,
                queued: self.queued.clone(),
            })
    }

    /// Take the message stream, waiting for the current reader to release it
    pub async fn messages(&self) -> MessageCursor {
        MessageCursor {
            queue: self.messages.clone().lock_owned().await,
            queued: self.queued.clone(),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        match *self.exit.borrow() {
            Some(exit) => ProcessState::Terminated(exit),
            None => ProcessState::Running,
        }
    }

    /// Whether the process is still running
    pub fn is_running(&self) -> bool {
        matches!(self.state(), ProcessState::Running)
    }

    /// Wait for the process to exit on its own
    pub async fn wait(&self) -> ProcessExit {
        wait_exit(&mut self.exit.clone()).await
    }

    /// Everything captured from stderr so far, bounded by the configured
    /// capacity
    pub async fn stderr_output(&self) -> String {
        self.stderr.lock().await.contents()
    }

    /// Stop the process
    ///
    /// Closes stdin and waits for a clean exit, then sends SIGTERM, then
    /// kills. Closing stdin and the clean exit share one `shutdown_timeout`
    /// budget, so a writer stuck on a full pipe cannot stall shutdown.
    /// Pending control requests fail once this returns. Calling it again, or
    /// after the process already exited, returns the recorded exit.
    pub async fn terminate(&self) -> ProcessExit {
        let deadline = Instant::now() + self.shutdown_timeout;
        let mut exit = self.exit.clone();

        let graceful = match tokio::time::timeout_at(deadline, self.stdin.close()).await {
            Ok(()) => tokio::time::timeout_at(deadline, wait_exit(&mut exit))
                .await
                .ok(),
            Err(_) => {
                tracing::warn!(pid = ?self.pid, "stdin busy, could not close it in time");
                None
            }
        };
        let status = match graceful {
            Some(status) => status,
            None => {
                let status = self.escalate(&mut exit).await;
                // A blocked writer fails once the child is gone, freeing stdin
                if tokio::time::timeout(self.kill_grace, self.stdin.close())
                    .await
                    .is_err()
                {
                    tracing::debug!(pid = ?self.pid, "stdin still held after the process exited");
                }
                status
            }
        };

        self.control.close(format!("process terminated ({})", status));
        status
    }

    async fn escalate(&self, exit: &mut watch::Receiver<Option<ProcessExit>>) -> ProcessExit {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            tracing::debug!(pid, "process still running after stdin closed, sending SIGTERM");
            send_sigterm(pid);
            if let Some(status) = wait_within(exit, self.kill_grace).await {
                return status;
            }
        }

        tracing::warn!(pid = ?self.pid, "process ignored shutdown, killing");
        self.force_kill();
        wait_exit(exit).await
    }

    fn force_kill(&self) {
        if let Some(kill) = lock(&self.kill).take() {
            // The waiter is gone only if the process already exited
            let _ = kill.send(());
        }
    }
}

impl fmt::Debug for ProcessSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSession")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::debug!(pid = ?self.pid, "process session dropped while running, killing");
            self.force_kill();
        }
        self.control.close("process session dropped");
        // The exit waiter keeps running so the child is always reaped
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn wait_within(
    exit: &mut watch::Receiver<Option<ProcessExit>>,
    timeout: Duration,
) -> Option<ProcessExit> {
    tokio::time::timeout(timeout, wait_exit(exit)).await.ok()
}

#[cfg(unix)]
fn send_sigterm(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        tracing::debug!(pid, error = %err, "SIGTERM failed");
    }
}

fn spawn_error(program: &Path, err: io::Error) -> TransportError {
    let message = match err.kind() {
        io::ErrorKind::NotFound => format!("executable not found: {}", program.display()),
        io::ErrorKind::PermissionDenied => {
            format!("permission denied launching {}", program.display())
        }
        _ => format!("failed to launch {}: {}", program.display(), err),
    };
    TransportError::Connection(message)
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_exit_display() {
        let clean = ProcessExit {
            code: Some(0),
            signal: None,
        };
        assert!(clean.success());
        assert_eq!(clean.to_string(), "exit code 0");

        let killed = ProcessExit {
            code: None,
            signal: Some(9),
        };
        assert!(!killed.success());
        assert_eq!(killed.to_string(), "signal 9");
        assert_eq!(ProcessExit::unknown().to_string(), "unknown status");
    }

    #[tokio::test]
    async fn test_start_missing_executable() {
        let err = ProcessSession::start(ProcessConfig::new("/nonexistent/agentwire-cli"))
            .await
            .unwrap_err();
        match err {
            TransportError::Connection(message) => {
                assert!(message.contains("not found"), "{}", message)
            }
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_missing_cwd() {
        let config = ProcessConfig::new("sh").with_cwd("/nonexistent/agentwire-dir");
        let err = ProcessSession::start(config).await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(ref m) if m.contains("working directory")));
    }
}
