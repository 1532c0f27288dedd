//! Streaming line codec
//!
//! Serial reads can split a reply at any byte, so incoming data is buffered
//! until a `\n` terminator arrives. A trailing `\r` is stripped as well since
//! some boards print with `Serial.println`.

use tracing::warn;

use crate::LINE_TERMINATOR;

/// Maximum buffered line length (reasonable limit to prevent unbounded growth)
pub const MAX_LINE_LEN: usize = 1024;

/// Streaming `\n`-delimited line codec
#[derive(Debug, Default)]
pub struct LineCodec {
    buffer: Vec<u8>,
}

impl LineCodec {
    /// Create a new line codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(128),
        }
    }

    /// Push raw bytes into the codec buffer
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        if self.buffer.len() > MAX_LINE_LEN && !self.buffer.contains(&LINE_TERMINATOR) {
            warn!(
                "Discarding {} buffered bytes without line terminator",
                self.buffer.len()
            );
            self.buffer.clear();
        }
    }

    /// Extract the next complete line, without its terminator
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buffer.iter().position(|&b| b == LINE_TERMINATOR)?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Number of bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
