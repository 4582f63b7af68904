//! Control channel
//!
//! Correlates outgoing control requests with the responses the read loop
//! pulls off stdout. Senders and the read loop never wait on each other: a
//! request registers a one-shot slot, the read loop resolves it.
//!
//! The pending table is the only state shared between the write path and the
//! read path. It sits behind one mutex, and a slot is always removed from the
//! table before it is resolved, so a slot can never be resolved twice.

use crate::error::{Result, TransportError};
use crate::traits::MessageWriter;
use agentwire_protocol::{ControlRequest, ControlResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

type Slot = oneshot::Sender<Result<Value>>;
type SlotReceiver = oneshot::Receiver<Result<Value>>;

#[derive(Default)]
struct ControlTable {
    /// Resolvers, removed on response, timeout, or close
    pending: HashMap<String, Slot>,
    /// Receivers not yet claimed by `await_response`
    receivers: HashMap<String, SlotReceiver>,
    /// Set once the session is gone
    closed: Option<String>,
}

/// Request/response correlation for control messages
pub struct ControlChannel {
    writer: Arc<dyn MessageWriter>,
    next_id: AtomicU64,
    table: Mutex<ControlTable>,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl ControlChannel {
    /// Create a channel writing requests to `writer`
    pub fn new(writer: Arc<dyn MessageWriter>) -> Self {
        Self {
            writer,
            next_id: AtomicU64::new(0),
            table: Mutex::new(ControlTable::default()),
        }
    }

    fn table(&self) -> MutexGuard<'_, ControlTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_request_id(&self) -> String {
        let counter = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("req_{}_{}", counter, &suffix[..8])
    }

    /// Send a control request and return its correlation id
    ///
    /// `payload` becomes the `request` field of the envelope and must carry
    /// its own `subtype`.
    pub async fn send_request(&self, payload: Value) -> Result<String> {
        let request_id = self.next_request_id();
        let envelope = ControlRequest::new(request_id.clone(), payload).to_value()?;

        {
            let mut table = self.table();
            if let Some(reason) = &table.closed {
                return Err(TransportError::ChannelClosed(reason.clone()));
            }
            let (tx, rx) = oneshot::channel();
            table.pending.insert(request_id.clone(), tx);
            table.receivers.insert(request_id.clone(), rx);
        }

        if let Err(err) = self.writer.write_message(&envelope).await {
            self.forget(&request_id);
            return Err(err);
        }

        tracing::debug!(request_id = %request_id, "sent control request");
        Ok(request_id)
    }

    /// Wait for the response to a previously sent request
    ///
    /// Resolves to the response payload (`null` when the CLI sent none),
    /// [`TransportError::ControlRejected`] for an error response,
    /// [`TransportError::ControlTimeout`] when `timeout` elapses first, or
    /// [`TransportError::ChannelClosed`] when the session ends while waiting.
    pub async fn await_response(&self, request_id: &str, timeout: Duration) -> Result<Value> {
        let receiver = {
            let mut table = self.table();
            match table.receivers.remove(request_id) {
                Some(receiver) => receiver,
                None => {
                    return Err(match &table.closed {
                        Some(reason) => TransportError::ChannelClosed(reason.clone()),
                        None => TransportError::UnknownRequest(request_id.to_string()),
                    });
                }
            }
        };

        // Dropping this future mid-wait must not leave a slot behind
        let mut guard = PendingGuard {
            channel: self,
            request_id,
            armed: true,
        };

        let outcome = match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::ChannelClosed(
                "response slot dropped".to_string(),
            )),
            Err(_) => {
                tracing::warn!(request_id, ?timeout, "control request timed out");
                Err(TransportError::ControlTimeout {
                    request_id: request_id.to_string(),
                    timeout,
                })
            }
        };

        guard.armed = !matches!(outcome, Err(TransportError::ControlTimeout { .. }));
        if !guard.armed {
            self.forget(request_id);
        }
        outcome
    }

    /// Send a request and wait for its response
    pub async fn request(&self, payload: Value, timeout: Duration) -> Result<Value> {
        let request_id = self.send_request(payload).await?;
        self.await_response(&request_id, timeout).await
    }

    /// Resolve the pending request a `control_response` value answers
    ///
    /// Returns `true` when a pending request was resolved. Responses for
    /// unknown, timed-out, or already resolved ids are dropped.
    pub fn deliver_response(&self, value: &Value) -> bool {
        let response = match ControlResponse::from_value(value) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "malformed control response dropped");
                return false;
            }
        };

        let slot = self.table().pending.remove(response.request_id());
        let Some(slot) = slot else {
            tracing::warn!(
                request_id = response.request_id(),
                "control response for unknown request dropped"
            );
            return false;
        };

        let outcome = match response {
            ControlResponse::Success { response, .. } => Ok(response.unwrap_or(Value::Null)),
            ControlResponse::Error { request_id, error } => Err(TransportError::ControlRejected {
                request_id,
                message: error,
            }),
        };
        if slot.send(outcome).is_err() {
            tracing::debug!("control response arrived after its waiter left");
        }
        true
    }

    /// Fail every pending request and refuse new ones
    ///
    /// Responses nobody claimed with `await_response` are released; waiting
    /// on them afterwards reports the close. Idempotent; the first reason
    /// wins.
    pub fn close(&self, reason: impl Into<String>) {
        let mut table = self.table();
        if table.closed.is_some() {
            return;
        }
        let reason = reason.into();
        let pending = std::mem::take(&mut table.pending);
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), %reason, "failing pending control requests");
        }
        for (_, slot) in pending {
            let _ = slot.send(Err(TransportError::ChannelClosed(reason.clone())));
        }
        table.receivers.clear();
        table.closed = Some(reason);
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.table().pending.len()
    }

    fn forget(&self, request_id: &str) {
        let mut table = self.table();
        table.pending.remove(request_id);
        table.receivers.remove(request_id);
    }
}

struct PendingGuard<'a> {
    channel: &'a ControlChannel,
    request_id: &'a str,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.channel.table().pending.remove(self.request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Captures written messages in memory
    #[derive(Default)]
    struct RecordingWriter {
        written: Mutex<Vec<Value>>,
        fail: bool,
    }

    impl RecordingWriter {
        fn written(&self) -> Vec<Value> {
            self.written.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageWriter for RecordingWriter {
        async fn write_message(&self, message: &Value) -> Result<()> {
            if self.fail {
                return Err(TransportError::WriteAfterClose);
            }
            self.written.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn channel() -> (Arc<RecordingWriter>, ControlChannel) {
        let writer = Arc::new(RecordingWriter::default());
        let channel = ControlChannel::new(writer.clone());
        (writer, channel)
    }

    fn success(request_id: &str, body: Value) -> Value {
        json!({
            "type": "control_response",
            "response": {"subtype": "success", "request_id": request_id, "response": body}
        })
    }

    #[tokio::test]
    async fn test_send_writes_envelope() {
        let (writer, channel) = channel();
        let id = channel
            .send_request(json!({"subtype": "interrupt"}))
            .await
            .unwrap();

        let written = writer.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["type"], "control_request");
        assert_eq!(written[0]["request_id"], id.as_str());
        assert_eq!(written[0]["request"]["subtype"], "interrupt");
        assert_eq!(channel.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_monotonic() {
        let (_, channel) = channel();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(channel.send_request(json!({"subtype": "interrupt"})).await.unwrap());
        }
        for (n, id) in ids.iter().enumerate() {
            assert!(id.starts_with(&format!("req_{}_", n + 1)), "bad id {}", id);
        }
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[tokio::test]
    async fn test_response_before_await() {
        let (_, channel) = channel();
        let id = channel.send_request(json!({"subtype": "interrupt"})).await.unwrap();

        assert!(channel.deliver_response(&success(&id, json!({"ok": 1}))));
        let response = channel
            .await_response(&id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response, json!({"ok": 1}));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_response_while_awaiting() {
        let (_, channel) = channel();
        let channel = Arc::new(channel);
        let id = channel.send_request(json!({"subtype": "interrupt"})).await.unwrap();

        let waiter = {
            let channel = Arc::clone(&channel);
            let id = id.clone();
            tokio::spawn(async move { channel.await_response(&id, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(channel.deliver_response(&success(&id, Value::Null)));

        assert_eq!(waiter.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_responses_matched_by_id_not_order() {
        let (_, channel) = channel();
        let first = channel.send_request(json!({"subtype": "a"})).await.unwrap();
        let second = channel.send_request(json!({"subtype": "b"})).await.unwrap();

        channel.deliver_response(&success(&second, json!("second")));
        channel.deliver_response(&success(&first, json!("first")));

        let timeout = Duration::from_secs(1);
        assert_eq!(channel.await_response(&first, timeout).await.unwrap(), json!("first"));
        assert_eq!(channel.await_response(&second, timeout).await.unwrap(), json!("second"));
    }

    #[tokio::test]
    async fn test_error_response() {
        let (_, channel) = channel();
        let id = channel.send_request(json!({"subtype": "set_model"})).await.unwrap();
        channel.deliver_response(&json!({
            "type": "control_response",
            "response": {"subtype": "error", "request_id": id, "error": "unknown model"}
        }));

        match channel.await_response(&id, Duration::from_secs(1)).await {
            Err(TransportError::ControlRejected { request_id, message }) => {
                assert_eq!(request_id, id);
                assert_eq!(message, "unknown model");
            }
            other => panic!("Expected ControlRejected, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_when_no_response() {
        let (_, channel) = channel();
        let id = channel.send_request(json!({"subtype": "interrupt"})).await.unwrap();

        let result = channel.await_response(&id, Duration::from_secs(30)).await;
        assert!(matches!(result, Err(TransportError::ControlTimeout { .. })));
        assert_eq!(channel.pending_count(), 0);

        // A late response finds nothing to resolve
        assert!(!channel.deliver_response(&success(&id, Value::Null)));
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let (_, channel) = channel();
        let channel = Arc::new(channel);
        let id = channel.send_request(json!({"subtype": "interrupt"})).await.unwrap();

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move { channel.await_response(&id, Duration::from_secs(60)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        channel.close("process exited");
        match waiter.await.unwrap() {
            Err(TransportError::ChannelClosed(reason)) => assert_eq!(reason, "process exited"),
            other => panic!("Expected ChannelClosed, got {:?}", other),
        }
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_close_before_await() {
        let (_, channel) = channel();
        let id = channel.send_request(json!({"subtype": "interrupt"})).await.unwrap();
        channel.close("gone");
        channel.close("second reason ignored");

        let result = channel.await_response(&id, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(TransportError::ChannelClosed(reason)) if reason == "gone"));
    }

    #[tokio::test]
    async fn test_send_after_close_rejected() {
        let (writer, channel) = channel();
        channel.close("gone");

        let result = channel.send_request(json!({"subtype": "interrupt"})).await;
        assert!(matches!(result, Err(TransportError::ChannelClosed(_))));
        assert!(writer.written().is_empty());
    }

    #[tokio::test]
    async fn test_no_double_resolve() {
        let (_, channel) = channel();
        let id = channel.send_request(json!({"subtype": "interrupt"})).await.unwrap();

        assert!(channel.deliver_response(&success(&id, json!(1))));
        assert!(!channel.deliver_response(&success(&id, json!(2))));

        let response = channel.await_response(&id, Duration::from_secs(1)).await;
        assert_eq!(response.unwrap(), json!(1));
        channel.close("late close");
        assert!(!channel.deliver_response(&success(&id, json!(3))));
    }

    #[tokio::test]
    async fn test_close_releases_unclaimed_requests() {
        let (_, channel) = channel();
        let answered = channel.send_request(json!({"subtype": "a"})).await.unwrap();
        let unanswered = channel.send_request(json!({"subtype": "b"})).await.unwrap();
        channel.deliver_response(&success(&answered, json!(1)));
        assert_eq!(channel.table().receivers.len(), 2);

        channel.close("gone");
        assert_eq!(channel.table().receivers.len(), 0);
        assert_eq!(channel.pending_count(), 0);

        for id in [answered, unanswered] {
            let result = channel.await_response(&id, Duration::from_secs(1)).await;
            assert!(matches!(result, Err(TransportError::ChannelClosed(reason)) if reason == "gone"));
        }
    }

    #[tokio::test]
    async fn test_await_unknown_id() {
        let (_, channel) = channel();
        let result = channel.await_response("req_99_deadbeef", Duration::from_millis(10)).await;
        assert!(matches!(result, Err(TransportError::UnknownRequest(_))));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_slot() {
        let writer = Arc::new(RecordingWriter {
            fail: true,
            ..Default::default()
        });
        let channel = ControlChannel::new(writer);

        let result = channel.send_request(json!({"subtype": "interrupt"})).await;
        assert!(matches!(result, Err(TransportError::WriteAfterClose)));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wait_removes_slot() {
        let (_, channel) = channel();
        let id = channel.send_request(json!({"subtype": "interrupt"})).await.unwrap();

        let wait = channel.await_response(&id, Duration::from_secs(60));
        let _ = tokio::time::timeout(Duration::from_millis(10), wait).await;

        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn test_malformed_response_ignored() {
        let (_, channel) = channel();
        assert!(!channel.deliver_response(&json!({"type": "control_response"})));
    }
}
