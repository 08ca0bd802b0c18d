/// Splits an unbounded chunked character stream into complete lines.
///
/// Holds the unterminated trailing fragment between calls, so any split of
/// the input across `feed` calls yields the same line sequence as feeding
/// it all at once. Each PTY channel gets its own framer; the buffer is
/// read and replaced within a single `&mut self` call, never shared.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes, in order.
    ///
    /// CRLF pairs are normalized to LF before splitting. Yielded lines have
    /// trailing whitespace removed; lines that are empty after trimming are
    /// suppressed. The final unterminated segment is retained as the new
    /// buffer, never emitted.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let normalized = self.buf.replace("\r\n", "\n");

        let mut segments: Vec<&str> = normalized.split('\n').collect();
        let rest = segments.pop().unwrap_or("").to_string();

        let lines = segments
            .iter()
            .map(|s| s.trim_end())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        self.buf = rest;
        lines
    }

    /// The unterminated trailing fragment currently held.
    pub fn pending(&self) -> &str {
        &self.buf
    }
}
