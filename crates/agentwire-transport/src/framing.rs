//! JSON framing over a byte stream
//!
//! The CLI writes one JSON value per line, but pipe reads do not respect line
//! boundaries: a read may end inside a value, contain several values, or split
//! a multi-byte character. [`FramedReader`] accumulates bytes and yields every
//! complete value as soon as it is available.

use crate::error::{Result, TransportError};
use serde_json::{Deserializer, Value};

/// Default frame buffer ceiling (1 MiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Incremental decoder from raw bytes to JSON values
///
/// Input is consumed line by line. A light structural scan follows each new
/// byte exactly once and notes where top-level values end; the JSON parser
/// only runs when a value has completed or a line has ended, so a large value
/// arriving in small reads is parsed once. The ceiling applies to the value
/// being assembled: complete values ahead of it in the same chunk are always
/// yielded, and a value that grows past `max_buffer_size` fails before it can
/// decode.
///
/// After an error the reader resynchronises at the next newline, so one bad
/// line never poisons the values that follow it.
#[derive(Debug)]
pub struct FramedReader {
    buffer: Vec<u8>,
    max_buffer_size: usize,
    /// Skipping the rest of a line that already produced an error
    discarding: bool,
    scan: Scan,
}

/// Structural position within the buffer, carried across pushes
#[derive(Debug, Default)]
struct Scan {
    /// Bytes of the buffer already scanned
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// Inside a bare top-level scalar (number, literal, or garbage)
    in_scalar: bool,
    /// Buffer index where the value being assembled starts
    value_start: Option<usize>,
    /// A top-level value ended since the last drain
    completed: bool,
}

impl Scan {
    fn begin(&mut self, at: usize) {
        if self.in_scalar {
            self.in_scalar = false;
            self.end();
        }
        self.value_start = Some(at);
    }

    fn end(&mut self) {
        self.value_start = None;
        self.completed = true;
    }

    /// Advance over `buffer[offset..]`; returns where a value that outgrew
    /// `limit` started
    fn advance(&mut self, buffer: &[u8], limit: usize) -> Option<usize> {
        while self.offset < buffer.len() {
            let at = self.offset;
            let byte = buffer[at];
            self.offset += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                    if self.depth == 0 {
                        self.end();
                    }
                }
            } else {
                match byte {
                    b'"' => {
                        if self.depth == 0 {
                            self.begin(at);
                        }
                        self.in_string = true;
                    }
                    b'{' | b'[' => {
                        if self.depth == 0 {
                            self.begin(at);
                        }
                        self.depth += 1;
                    }
                    b'}' | b']' if self.depth > 0 => {
                        self.depth -= 1;
                        if self.depth == 0 {
                            self.end();
                        }
                    }
                    b' ' | b'\t' | b'\r' | b'\n' => {
                        if self.depth == 0 && self.in_scalar {
                            self.in_scalar = false;
                            self.end();
                        }
                    }
                    _ if self.depth == 0 && !self.in_scalar => {
                        self.begin(at);
                        self.in_scalar = true;
                    }
                    _ => {}
                }
            }

            if let Some(start) = self.value_start {
                if self.offset - start > limit {
                    return Some(start);
                }
            }
        }
        None
    }
}

impl Default for FramedReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FramedReader {
    /// Create a reader with the default ceiling
    pub fn new() -> Self {
        Self::with_max_buffer_size(DEFAULT_MAX_BUFFER_SIZE)
    }

    /// Create a reader with a custom ceiling in bytes
    pub fn with_max_buffer_size(max_buffer_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer_size,
            discarding: false,
            scan: Scan::default(),
        }
    }

    /// The configured ceiling
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Bytes currently held waiting for the rest of a value
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk and collect the frames it completes, in stream order
    ///
    /// The result may be empty (the chunk only extended a partial value) or
    /// hold several entries (the chunk completed more than one value). Errors
    /// are reported in position: values before a bad line are still yielded
    /// ahead of the error.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Value>> {
        let mut frames = Vec::new();

        for piece in chunk.split_inclusive(|byte| *byte == b'\n') {
            let line_end = piece.ends_with(b"\n");

            if self.discarding {
                if line_end {
                    self.discarding = false;
                }
                continue;
            }

            self.buffer.extend_from_slice(piece);
            if let Some(start) = self.scan.advance(&self.buffer, self.max_buffer_size) {
                self.overflow(start, line_end, &mut frames);
                continue;
            }
            if self.scan.completed || line_end {
                self.drain_complete(&mut frames, line_end);
            }
        }

        frames
    }

    /// Drop the value that outgrew the ceiling, keeping complete values
    /// before it
    fn overflow(&mut self, start: usize, line_end: bool, frames: &mut Vec<Result<Value>>) {
        tracing::warn!(
            buffered = self.buffer.len() - start,
            limit = self.max_buffer_size,
            "frame buffer ceiling exceeded, dropping partial message"
        );
        self.buffer.truncate(start);
        // Ends a number the oversized value ran into
        self.buffer.push(b'\n');
        self.drain_complete(frames, true);
        self.reset();
        self.discarding = !line_end;
        frames.push(Err(TransportError::BufferExceeded {
            limit: self.max_buffer_size,
        }));
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.scan = Scan::default();
    }

    /// Flush the buffer at end of stream
    ///
    /// Yields a trailing value that was waiting for a delimiter, or an error
    /// if the stream stopped in the middle of a value.
    pub fn finish(&mut self) -> Option<Result<Value>> {
        self.discarding = false;
        self.scan = Scan::default();
        let buffered = std::mem::take(&mut self.buffer);
        if buffered.iter().all(u8::is_ascii_whitespace) {
            return None;
        }

        Some(
            serde_json::from_slice(&buffered).map_err(|err| TransportError::Json {
                message: format!("stream ended inside a JSON value: {}", err),
                raw: String::from_utf8_lossy(&buffered).trim_end().to_string(),
            }),
        )
    }

    /// Decode every complete value at the front of the buffer
    fn drain_complete(&mut self, frames: &mut Vec<Result<Value>>, line_end: bool) {
        let mut consumed = 0;

        loop {
            let rest = &self.buffer[consumed..];
            let mut values = Deserializer::from_slice(rest).into_iter::<Value>();

            match values.next() {
                // Only whitespace left
                None => {
                    consumed = self.buffer.len();
                    break;
                }
                Some(Ok(value)) => {
                    let end = consumed + values.byte_offset();
                    // A number running into the end of the buffer may still grow
                    if value.is_number() && end == self.buffer.len() {
                        break;
                    }
                    tracing::trace!(bytes = end - consumed, "framed JSON value");
                    consumed = end;
                    frames.push(Ok(value));
                }
                Some(Err(err)) if err.is_eof() => break,
                Some(Err(err)) => {
                    let raw = String::from_utf8_lossy(rest).trim_end().to_string();
                    consumed = self.buffer.len();
                    self.discarding = !line_end;
                    frames.push(Err(TransportError::Json {
                        message: err.to_string(),
                        raw,
                    }));
                    break;
                }
            }
        }

        self.buffer.drain(..consumed);
        // Whatever is left is the start of the next value; rescan it alone
        self.scan = Scan::default();
        let _ = self.scan.advance(&self.buffer, usize::MAX);
    }
}
