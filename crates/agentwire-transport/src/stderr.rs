//! Bounded stderr capture
//!
//! The child's stderr is drained continuously so the child never blocks on a
//! full pipe. Only the most recent `capacity` bytes are kept; they are attached
//! to the error raised when the process exits abnormally.

/// Default stderr capture size (64 KiB)
pub const DEFAULT_STDERR_CAPACITY: usize = 64 * 1024;

/// Tail buffer for stderr output with line splitting
#[derive(Debug)]
pub struct StderrCapture {
    captured: Vec<u8>,
    capacity: usize,
    truncated: bool,
    partial_line: Vec<u8>,
}

impl Default for StderrCapture {
    fn default() -> Self {
        Self::new(DEFAULT_STDERR_CAPACITY)
    }
}

impl StderrCapture {
    /// Create a capture keeping at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            captured: Vec::new(),
            capacity,
            truncated: false,
            partial_line: Vec::new(),
        }
    }

    /// Append raw output, returning the lines it completed
    ///
    /// Returned lines have their line terminator removed. A line longer than
    /// the capacity is cut at the capacity.
    pub fn append(&mut self, bytes: &[u8]) -> Vec<String> {
        self.captured.extend_from_slice(bytes);
        if self.captured.len() > self.capacity {
            let excess = self.captured.len() - self.capacity;
            self.captured.drain(..excess);
            if !self.truncated {
                tracing::warn!(
                    capacity = self.capacity,
                    "stderr capture full, discarding oldest output"
                );
            }
            self.truncated = true;
        }

        let mut lines = Vec::new();
        for piece in bytes.split_inclusive(|byte| *byte == b'\n') {
            if let Some(line) = piece.strip_suffix(b"\n") {
                self.partial_line.extend_from_slice(line);
                let line = std::mem::take(&mut self.partial_line);
                lines.push(decode_line(&line));
            } else {
                self.partial_line.extend_from_slice(piece);
                self.partial_line.truncate(self.capacity);
            }
        }
        lines
    }

    /// Take the unterminated last line, if any
    pub fn flush_line(&mut self) -> Option<String> {
        if self.partial_line.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.partial_line);
        Some(decode_line(&line))
    }

    /// Whether older output was discarded
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Number of bytes currently held
    pub fn len(&self) -> usize {
        self.captured.len()
    }

    /// Whether nothing has been captured
    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    /// The captured output as text
    pub fn contents(&self) -> String {
        let text = String::from_utf8_lossy(&self.captured);
        if self.truncated {
            format!("[earlier output truncated]\n{}", text)
        } else {
            text.into_owned()
        }
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}
