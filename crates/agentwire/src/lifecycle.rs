//! Session teardown with an explicit path and a drop-time safety net
//!
//! [`SessionGuard::close`] is the guaranteed path: it stops prompt forwarders
//! and waits for the process to terminate. Dropping an armed guard instead
//! schedules the same termination on the current tokio runtime and returns
//! immediately. That drop path may never finish (no runtime, runtime shutting
//! down); the process session's own `Drop` then kills the child.

use agentwire_transport::{ProcessExit, ProcessSession};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::AbortHandle;

/// Owns a live process session until it is explicitly closed or dropped
pub(crate) struct SessionGuard {
    session: Arc<ProcessSession>,
    forwarders: Mutex<Vec<AbortHandle>>,
    armed: bool,
}

impl SessionGuard {
    pub(crate) fn new(session: ProcessSession) -> Self {
        Self {
            session: Arc::new(session),
            forwarders: Mutex::new(Vec::new()),
            armed: true,
        }
    }

    pub(crate) fn session(&self) -> &Arc<ProcessSession> {
        &self.session
    }

    /// Stop `forwarder` when the session is torn down
    pub(crate) fn track(&self, forwarder: AbortHandle) {
        let mut forwarders = self.forwarders.lock().unwrap_or_else(PoisonError::into_inner);
        forwarders.retain(|task| !task.is_finished());
        forwarders.push(forwarder);
    }

    /// Terminate the process and wait for it
    pub(crate) async fn close(mut self) -> ProcessExit {
        self.armed = false;
        self.abort_forwarders();
        let exit = self.session.terminate().await;
        tracing::debug!(%exit, "session closed");
        exit
    }

    fn abort_forwarders(&self) {
        let forwarders = std::mem::take(
            &mut *self.forwarders.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for forwarder in forwarders {
            forwarder.abort();
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.abort_forwarders();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("session abandoned, terminating in background");
                let session = Arc::clone(&self.session);
                handle.spawn(async move {
                    session.terminate().await;
                });
            }
            Err(_) => {
                tracing::debug!("session abandoned outside a runtime, killing");
            }
        }
    }
}
