//! Fake CLI scripts for integration tests
//!
//! Each script is a small `sh` program that speaks just enough stream-json
//! for the test that uses it. Scripts live in a temp dir that is removed when
//! the [`FakeCli`] is dropped.

#![allow(dead_code)]

use agentwire::AgentOptions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A reply cycle: init, answer, result, then one message past the result
pub const REPLY_CYCLE: &str = r#"
      printf '%s\n' '{"type":"system","subtype":"init","session_id":"s1"}'
      printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"4"}],"model":"fake-model"}}'
      printf '%s\n' '{"type":"result","subtype":"success","duration_ms":10,"duration_api_ms":5,"is_error":false,"num_turns":1,"session_id":"s1","result":"4"}'
      printf '%s\n' '{"type":"assistant","message":{"content":"after","model":"fake-model"}}'
"#;

/// Interactive CLI: answers user turns with [`REPLY_CYCLE`], acknowledges
/// every control request, and logs stdin to `$STDIN_LOG` when set
pub fn interactive_script() -> String {
    let head = r#"
echo "fake cli ready" >&2
while IFS= read -r line; do
  [ -n "$STDIN_LOG" ] && printf '%s\n' "$line" >> "$STDIN_LOG"
  case "$line" in
    *'"type":"control_request"'*)
      id=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      printf '{"type":"control_response","response":{"subtype":"success","request_id":"%s","response":{}}}\n' "$id"
      ;;
    *'"type":"ping"'*)
      printf '%s\n' '{"type":"system","subtype":"pong"}'
      ;;
    *'"type":"user"'*)"#;
    let tail = r#"      ;;
  esac
done
"#;
    [head, REPLY_CYCLE, tail].concat()
}

/// A temp dir holding one executable fake CLI
pub struct FakeCli {
    dir: TempDir,
    path: PathBuf,
}

impl FakeCli {
    /// Write `body` as an executable `sh` script
    pub fn new(body: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake-cli");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, path }
    }

    /// The interactive fake
    pub fn interactive() -> Self {
        Self::new(&interactive_script())
    }

    /// Script path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A file path inside the script's temp dir
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Options pointing at this script, with short shutdown waits
    pub fn options(&self) -> AgentOptions {
        AgentOptions::new()
            .with_cli_path(&self.path)
            .with_shutdown_timeout(Duration::from_millis(500))
    }

    /// Lines logged to `name`, empty when the file was never written
    pub fn read_lines(&self, name: &str) -> Vec<String> {
        std::fs::read_to_string(self.file(name))
            .map(|text| text.lines().map(String::from).collect())
            .unwrap_or_default()
    }
}

/// Whether a process with `pid` still exists
pub fn process_alive(pid: &str) -> bool {
    std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
