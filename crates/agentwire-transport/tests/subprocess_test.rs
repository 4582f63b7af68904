//! Integration tests for the subprocess transport, driven by shell scripts
//! standing in for the CLI

#![cfg(unix)]

use agentwire_transport::{ProcessConfig, ProcessSession, ProcessState, TransportError};
use serde_json::{Value, json};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn fast_shutdown(config: ProcessConfig) -> ProcessConfig {
    config
        .with_shutdown_timeout(Duration::from_millis(200))
        .with_kill_grace(Duration::from_millis(200))
}

async fn collect(session: &ProcessSession) -> Vec<Result<Value, TransportError>> {
    let mut messages = session.messages().await;
    let mut out = Vec::new();
    while let Some(message) = messages.next().await {
        out.push(message);
    }
    out
}

const CONTROL_ECHO: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
  if [ -n "$id" ]; then
    printf '{"type":"control_response","response":{"subtype":"success","request_id":"%s","response":{"ok":true}}}\n' "$id"
  fi
done
"#;

#[tokio::test]
async fn test_reads_messages_in_order() {
    let dir = TempDir::new().unwrap();
    let cli = script(
        &dir,
        "cli",
        r#"printf '{"type":"system","n":1}\n{"type":"assistant",'
printf '"n":2}\n{"type":"result","n":3}\n'"#,
    );

    let session = ProcessSession::start(ProcessConfig::new(cli)).await.unwrap();
    let messages: Vec<Value> = collect(&session)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let numbers: Vec<i64> = messages.iter().map(|m| m["n"].as_i64().unwrap()).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(session.wait().await.code(), Some(0));
    assert!(matches!(session.state(), ProcessState::Terminated(exit) if exit.success()));
}

#[tokio::test]
async fn test_non_zero_exit_reports_stderr() {
    let dir = TempDir::new().unwrap();
    let cli = script(
        &dir,
        "cli",
        r#"printf '{"type":"system"}\n'
echo "authentication failed" >&2
exit 3"#,
    );

    let session = ProcessSession::start(ProcessConfig::new(cli)).await.unwrap();
    let messages = collect(&session).await;

    assert_eq!(messages.len(), 2);
    assert!(messages[0].is_ok());
    match &messages[1] {
        Err(TransportError::Process { exit_code, stderr }) => {
            assert_eq!(*exit_code, Some(3));
            assert!(stderr.contains("authentication failed"));
        }
        other => panic!("expected process error, got {:?}", other),
    }
    assert!(session.stderr_output().await.contains("authentication failed"));
}

#[tokio::test]
async fn test_stderr_callback_sees_lines() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "echo first >&2\necho second >&2");

    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let config = ProcessConfig::new(cli)
        .with_stderr_callback(Arc::new(move |line: &str| sink.lock().unwrap().push(line.to_string())));

    let session = ProcessSession::start(config).await.unwrap();
    collect(&session).await;

    assert_eq!(*lines.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_oversized_message_is_skipped() {
    let dir = TempDir::new().unwrap();
    let body = format!(
        "printf '{{\"type\":\"big\",\"data\":\"{}\"}}\\n{{\"type\":\"small\"}}\\n'",
        "x".repeat(500)
    );
    let cli = script(&dir, "cli", &body);

    let session = ProcessSession::start(ProcessConfig::new(cli).with_max_buffer_size(128))
        .await
        .unwrap();
    let messages = collect(&session).await;

    assert!(matches!(
        messages[0],
        Err(TransportError::BufferExceeded { limit: 128 })
    ));
    assert_eq!(messages[1].as_ref().unwrap()["type"], "small");
    assert_eq!(messages.len(), 2);
}

#[tokio::test]
async fn test_control_round_trip() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", CONTROL_ECHO);

    let session = ProcessSession::start(fast_shutdown(ProcessConfig::new(cli)))
        .await
        .unwrap();
    let response = session
        .control()
        .request(json!({"subtype": "interrupt"}), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response, json!({"ok": true}));
    assert_eq!(session.control().pending_count(), 0);
    assert!(session.terminate().await.success());
}

#[tokio::test]
async fn test_inbound_control_request_is_rejected() {
    let dir = TempDir::new().unwrap();
    let cli = script(
        &dir,
        "cli",
        r#"printf '{"type":"control_request","request_id":"cli_1","request":{"subtype":"can_use_tool"}}\n'
IFS= read -r reply
printf '{"type":"echo","reply":%s}\n' "$reply""#,
    );

    let session = ProcessSession::start(ProcessConfig::new(cli)).await.unwrap();
    let messages = collect(&session).await;

    assert_eq!(messages.len(), 1);
    let echo = messages[0].as_ref().unwrap();
    assert_eq!(echo["reply"]["type"], "control_response");
    assert_eq!(echo["reply"]["response"]["subtype"], "error");
    assert_eq!(echo["reply"]["response"]["request_id"], "cli_1");
}

#[tokio::test]
async fn test_stdout_keeps_flowing_while_replies_are_blocked() {
    let dir = TempDir::new().unwrap();
    // Enough inbound requests that the replies overflow the stdin pipe,
    // which this CLI never reads
    let cli = script(
        &dir,
        "cli",
        r#"i=0
while [ $i -lt 2000 ]; do
  printf '{"type":"control_request","request_id":"cli_%d","request":{"subtype":"can_use_tool"}}\n' $i
  i=$((i+1))
done
printf '{"type":"after"}\n'
exec sleep 30"#,
    );

    let session = ProcessSession::start(fast_shutdown(ProcessConfig::new(cli)))
        .await
        .unwrap();
    let mut messages = session.messages().await;
    let next = tokio::time::timeout(Duration::from_secs(5), messages.next())
        .await
        .expect("stdout stalled behind control replies");
    assert_eq!(next.unwrap().unwrap()["type"], "after");
    drop(messages);

    let exit = tokio::time::timeout(Duration::from_secs(3), session.terminate())
        .await
        .unwrap();
    assert_eq!(exit.signal(), Some(15));
}

#[tokio::test]
async fn test_unread_messages_past_limit_report_queue_full() {
    let dir = TempDir::new().unwrap();
    let body = format!(
        r#"i=0
while [ $i -lt 50 ]; do
  printf '{{"type":"system","n":%d}}\n' $i
  i=$((i+1))
done
{}"#,
        CONTROL_ECHO
    );
    let cli = script(&dir, "cli", &body);

    let session = ProcessSession::start(fast_shutdown(
        ProcessConfig::new(cli).with_max_queued_messages(10),
    ))
    .await
    .unwrap();

    // The control reply follows all 50 messages on stdout
    session
        .control()
        .request(json!({"subtype": "interrupt"}), Duration::from_secs(5))
        .await
        .unwrap();
    session.close_stdin().await;

    let messages = collect(&session).await;
    assert_eq!(messages.len(), 11);
    for (n, message) in messages[..10].iter().enumerate() {
        assert_eq!(message.as_ref().unwrap()["n"], n as i64);
    }
    assert!(matches!(
        messages[10],
        Err(TransportError::QueueFull { limit: 10 })
    ));
    assert!(session.wait().await.success());
}

#[tokio::test]
async fn test_terminate_closes_stdin_first() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "cat > /dev/null\nexit 0");

    let session = ProcessSession::start(ProcessConfig::new(cli)).await.unwrap();
    assert!(session.is_running());

    let exit = session.terminate().await;
    assert!(exit.success());
    assert!(!session.is_running());
}

#[tokio::test]
async fn test_terminate_sends_sigterm() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "exec sleep 30");

    let session = ProcessSession::start(fast_shutdown(ProcessConfig::new(cli)))
        .await
        .unwrap();
    let exit = session.terminate().await;

    assert_eq!(exit.signal(), Some(15));
}

#[tokio::test]
async fn test_terminate_kills_when_sigterm_ignored() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "trap '' TERM\nexec sleep 30");

    let session = ProcessSession::start(fast_shutdown(ProcessConfig::new(cli)))
        .await
        .unwrap();
    let exit = session.terminate().await;

    assert_eq!(exit.signal(), Some(9));
}

#[tokio::test]
async fn test_terminate_is_bounded_while_a_write_is_blocked() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "exec sleep 30");

    let session = ProcessSession::start(fast_shutdown(ProcessConfig::new(cli)))
        .await
        .unwrap();

    // Far larger than a pipe buffer, and the child never reads
    let control = session.control().clone();
    let padding = "x".repeat(1024 * 1024);
    let writer = tokio::spawn(async move {
        control
            .send_request(json!({"subtype": "interrupt", "pad": padding}))
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!writer.is_finished());

    let exit = tokio::time::timeout(Duration::from_secs(3), session.terminate())
        .await
        .expect("terminate stalled behind the blocked write");
    assert_eq!(exit.signal(), Some(15));

    let sent = tokio::time::timeout(Duration::from_secs(3), writer)
        .await
        .unwrap()
        .unwrap();
    assert!(sent.is_err());
    assert!(matches!(
        session.write(b"late\n").await,
        Err(TransportError::WriteAfterClose)
    ));
}

#[tokio::test]
async fn test_terminate_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "exit 0");

    let session = ProcessSession::start(ProcessConfig::new(cli)).await.unwrap();
    let exited = session.wait().await;

    assert_eq!(session.terminate().await, exited);
    assert_eq!(session.terminate().await, exited);
}

#[tokio::test]
async fn test_pending_control_fails_on_exit() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "IFS= read -r line\nexit 0");

    let session = ProcessSession::start(ProcessConfig::new(cli)).await.unwrap();
    let err = session
        .control()
        .request(json!({"subtype": "interrupt"}), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::ChannelClosed(_)));
}

#[tokio::test]
async fn test_write_after_close_fails() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "cat > /dev/null");

    let session = ProcessSession::start(ProcessConfig::new(cli)).await.unwrap();
    session.write_json(&json!({"type": "user"})).await.unwrap();
    session.close_stdin().await;

    let err = session.write(b"late\n").await.unwrap_err();
    assert!(matches!(err, TransportError::WriteAfterClose));
    session.terminate().await;
}

#[tokio::test]
async fn test_message_stream_is_exclusive() {
    let dir = TempDir::new().unwrap();
    let cli = script(&dir, "cli", "exit 0");

    let session = ProcessSession::start(ProcessConfig::new(cli)).await.unwrap();
    let held = session.try_messages().unwrap();
    assert!(session.try_messages().is_none());

    drop(held);
    assert!(session.try_messages().is_some());
}

#[tokio::test]
async fn test_env_and_cwd_reach_child() {
    let dir = TempDir::new().unwrap();
    let cli = script(
        &dir,
        "cli",
        r#"printf '{"value":"%s","cwd":"%s"}\n' "$AGENTWIRE_TEST" "$(pwd)""#,
    );
    let workdir = TempDir::new().unwrap();

    let config = ProcessConfig::new(cli)
        .with_env("AGENTWIRE_TEST", "hello")
        .with_cwd(workdir.path());
    let session = ProcessSession::start(config).await.unwrap();
    let messages = collect(&session).await;

    let value = messages[0].as_ref().unwrap();
    assert_eq!(value["value"], "hello");
    let cwd = PathBuf::from(value["cwd"].as_str().unwrap());
    assert_eq!(
        cwd.canonicalize().unwrap(),
        workdir.path().canonicalize().unwrap()
    );
}
