//! Newline-delimited framing for the stdio transport.
//!
//! Child process stdout arrives in arbitrary chunks. [`LineFramer`]
//! accumulates raw bytes and yields complete lines only once their
//! terminating `\n` has arrived; a trailing partial line stays
//! buffered for the next chunk.

/// Incremental splitter for a newline-delimited byte stream.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line completed by it, in order.
    ///
    /// Lines are trimmed of surrounding whitespace (including a `\r`
    /// from CRLF framing); lines that are empty after trimming are
    /// skipped. Decoding is lossy per line, so a multi-byte character
    /// split across chunks is reassembled correctly.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let Some(last_newline) = self.buf.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let rest = self.buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buf, rest);

        complete
            .split(|&b| b == b'\n')
            .filter_map(|raw| {
                let text = String::from_utf8_lossy(raw);
                let line = text.trim();
                if line.is_empty() {
                    None
                } else {
                    Some(line.to_owned())
                }
            })
            .collect()
    }

    /// Discard any buffered partial line.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Number of buffered bytes awaiting a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
