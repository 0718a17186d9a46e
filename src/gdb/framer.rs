//! Line framing for the debugger's output stream

use tracing::trace;

/// The prompt GDB prints after each batch of output.
pub const PROMPT: &[u8] = b"(gdb) ";

/// Splits a raw byte stream into complete MI lines.
///
/// Incomplete trailing data is kept until the next chunk arrives. Carriage
/// returns are removed, and empty lines and prompt lines are dropped.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let raw = &self.buffer[start..end];
            let line = raw.strip_suffix(b"\r").unwrap_or(raw).to_vec();
            start = end + 1;

            if line.is_empty() || is_prompt(&line) {
                continue;
            }
            trace!("gdb line: {}", String::from_utf8_lossy(&line));
            lines.push(line);
        }
        self.buffer.drain(..start);
        lines
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

pub fn is_prompt(line: &[u8]) -> bool {
    line == PROMPT || line == &PROMPT[..PROMPT.len() - 1]
}
