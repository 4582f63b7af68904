//! Background tasks attached to a running process
//!
//! Three tasks run per process: one drains stdout through the framed reader,
//! one drains stderr into the capture buffer, one owns the child and reports
//! its exit. None of them waits on the caller, so a slow consumer on one
//! stream never stalls another.

use super::config::StderrCallback;
use super::process::ProcessExit;
use super::stdin::StdinWriter;
use crate::control::ControlChannel;
use crate::error::{Result, TransportError};
use crate::framing::FramedReader;
use crate::stderr::StderrCapture;
use agentwire_protocol::{ControlRequest, ControlResponse, is_control_request, is_control_response};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long stdout end-of-stream waits for stderr to drain
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Owns the child; publishes its exit status once
pub(crate) async fn wait_for_exit(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Option<ProcessExit>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        // Fires on an explicit kill or when the session is dropped
        _ = kill => {
            if let Err(err) = child.start_kill() {
                tracing::debug!(error = %err, "kill failed, process likely already exited");
            }
            child.wait().await
        }
    };

    let status = match status {
        Ok(status) => ProcessExit::from_status(status),
        Err(err) => {
            tracing::warn!(error = %err, "failed to collect process exit status");
            ProcessExit::unknown()
        }
    };
    tracing::debug!(%status, "process exited");
    exit.send_replace(Some(status));
}

/// Wait until the exit status is published
pub(crate) async fn wait_exit(exit: &mut watch::Receiver<Option<ProcessExit>>) -> ProcessExit {
    match exit.wait_for(Option::is_some).await {
        Ok(status) => (*status).unwrap_or_else(ProcessExit::unknown),
        // The waiter task vanished without reporting
        Err(_) => ProcessExit::unknown(),
    }
}

/// Drain stderr into the capture, forwarding complete lines
pub(crate) async fn pump_stderr(
    mut stderr: ChildStderr,
    capture: Arc<Mutex<StderrCapture>>,
    callback: Option<StderrCallback>,
) {
    let emit = |line: &str| {
        tracing::debug!(target: "agentwire::stderr", "{}", line);
        if let Some(callback) = &callback {
            callback(line);
        }
    };

    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let lines = capture.lock().await.append(&chunk[..n]);
                lines.iter().for_each(|line| emit(line));
            }
            Err(err) => {
                tracing::debug!(error = %err, "stderr read failed");
                break;
            }
        }
    }

    if let Some(line) = capture.lock().await.flush_line() {
        emit(&line);
    }
}

/// Stdout side of a process: framing, routing, and end-of-stream reporting
pub(crate) struct StdoutPump {
    pub stdout: ChildStdout,
    pub reader: FramedReader,
    pub control: Arc<ControlChannel>,
    pub stdin: Arc<StdinWriter>,
    pub messages: mpsc::UnboundedSender<Result<Value>>,
    /// Sent but not yet read; the cursor decrements it
    pub queued: Arc<AtomicUsize>,
    pub max_queued: usize,
    /// Output is being dropped until the reader catches up
    pub overflowing: bool,
    pub stderr: Arc<Mutex<StderrCapture>>,
    pub stderr_task: JoinHandle<()>,
    pub exit: watch::Receiver<Option<ProcessExit>>,
}

impl StdoutPump {
    pub(crate) async fn run(mut self) {
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        loop {
            match self.stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    for frame in self.reader.push(&chunk[..n]) {
                        self.route(frame);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "stdout read failed");
                    self.deliver(Err(err.into()));
                    break;
                }
            }
        }
        if let Some(frame) = self.reader.finish() {
            self.route(frame);
        }
        tracing::debug!("stdout closed");

        let status = wait_exit(&mut self.exit).await;
        if tokio::time::timeout(STDERR_DRAIN_TIMEOUT, &mut self.stderr_task)
            .await
            .is_err()
        {
            tracing::debug!("stderr still open after stdout closed");
        }

        if !status.success() {
            let stderr = self.stderr.lock().await.contents();
            self.deliver(Err(TransportError::Process {
                exit_code: status.code(),
                stderr,
            }));
        }
        self.control.close(format!("process exited ({})", status));
    }

    fn route(&mut self, frame: Result<Value>) {
        let value = match frame {
            Ok(value) => value,
            Err(err) => {
                self.forward(Err(err));
                return;
            }
        };

        if is_control_response(&value) {
            self.control.deliver_response(&value);
        } else if is_control_request(&value) {
            self.reject_inbound_request(value);
        } else {
            self.forward(Ok(value));
        }
    }

    /// Answer a CLI-initiated control request this client does not serve
    ///
    /// The reply is written from its own task: stdin may be full, and stdout
    /// must keep draining meanwhile.
    fn reject_inbound_request(&self, value: Value) {
        let request = match ControlRequest::from_value(value) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "malformed inbound control request dropped");
                return;
            }
        };
        let subtype = request.subtype().unwrap_or("<missing>");
        tracing::warn!(
            request_id = %request.request_id,
            subtype,
            "unsupported inbound control request"
        );

        let reply = ControlResponse::error(
            request.request_id.clone(),
            format!("unsupported control request subtype: {}", subtype),
        );
        let reply = match reply.to_value() {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(error = %err, "could not encode control reply");
                return;
            }
        };
        let stdin = Arc::clone(&self.stdin);
        tokio::spawn(async move {
            if let Err(err) = stdin.write_json(&reply).await {
                tracing::debug!(error = %err, "could not answer inbound control request");
            }
        });
    }

    /// Queue a frame for the caller, subject to the unread limit
    fn forward(&mut self, frame: Result<Value>) {
        if self.queued.load(Ordering::Acquire) < self.max_queued {
            self.overflowing = false;
            self.deliver(frame);
            return;
        }
        if !self.overflowing {
            self.overflowing = true;
            tracing::warn!(limit = self.max_queued, "message queue full, dropping output");
            self.deliver(Err(TransportError::QueueFull {
                limit: self.max_queued,
            }));
        } else {
            tracing::trace!("message queue full, frame dropped");
        }
    }

    /// Queue a frame regardless of the unread limit
    fn deliver(&self, frame: Result<Value>) {
        self.queued.fetch_add(1, Ordering::AcqRel);
        // Keep draining even with no reader so the child never blocks on stdout
        if self.messages.send(frame).is_err() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            tracing::trace!("message receiver gone, dropping frame");
        }
    }
}
