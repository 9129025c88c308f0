//! Incremental decoder for blank-line-delimited `event:`/`data:` records.
//!
//! Chunks may split anywhere, including inside a field name or a multi-byte
//! character. Bytes are held until a record terminator arrives and only then
//! decoded, so the sequence of records is the same however the body was
//! fragmented.

/// Event name used when a record carries no `event:` line.
pub const DEFAULT_EVENT: &str = "message";

/// Upstream's terminal payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One complete record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub event: String,
    pub data: String,
}

impl Record {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Record {
            event: event.into(),
            data: data.into(),
        }
    }

    /// True when the payload is the `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

/// Parse buffer. After every `push` it holds at most one unterminated record.
#[derive(Debug, Default)]
pub struct RecordParser {
    buf: Vec<u8>,
}

impl RecordParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every record it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Record> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut consumed = 0;
        while let Some((idx, delim_len)) = find_terminator(&self.buf[consumed..]) {
            let block = &self.buf[consumed..consumed + idx];
            if let Some(record) = parse_block(block) {
                records.push(record);
            }
            consumed += idx + delim_len;
        }
        self.buf.drain(..consumed);
        records
    }

    /// Bytes held for the current unterminated record.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// End of stream. Discards any unterminated fragment and reports whether
    /// one was present.
    pub fn finish(&mut self) -> bool {
        let had_partial = self.buf.iter().any(|b| !b.is_ascii_whitespace());
        if had_partial {
            tracing::debug!(bytes = self.buf.len(), "discarding unterminated record at stream end");
        }
        self.buf.clear();
        had_partial
    }
}

fn find_terminator(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_block(bytes: &[u8]) -> Option<Record> {
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(Record {
        event: event
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
        data: data_lines.join("\n"),
    })
}
