//! Per-connection newline-delimited byte framer.
//!
//! Each client gets one [`Framer`]. Bytes are appended as they arrive;
//! complete (`\n`-terminated) lines are drained out in order. If the
//! unterminated remainder ever exceeds `max_bytes`, the whole buffer is
//! discarded -- the connection itself is not closed, per the wire
//! contract's backpressure rule.

/// Accumulates bytes into newline-delimited frames.
pub struct Framer {
    buf: Vec<u8>,
    max_bytes: usize,
}

impl Framer {
    /// Create a framer with the given per-connection buffer cap.
    pub fn new(max_bytes: usize) -> Self {
        Self { buf: Vec::new(), max_bytes }
    }

    /// Feed newly-read bytes in. Returns the complete lines now available
    /// (oldest first, `\n`/`\r\n` stripped) and whether the buffer had to be
    /// discarded for exceeding the cap.
    pub fn push(&mut self, bytes: &[u8]) -> (Vec<Vec<u8>>, bool) {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop(); // trailing \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        let oversized = self.buf.len() > self.max_bytes;
        if oversized {
            self.buf.clear();
        }
        (lines, oversized)
    }
}
