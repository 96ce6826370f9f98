// Copyright 2026 The Harmony Shim Authors
// SPDX-License-Identifier: Apache-2.0

// Upstream SSE reader
//
// Splits the raw upstream byte stream into lines and classifies each one.
// Bytes are buffered until a full line is available, so a multi-byte UTF-8
// sequence split across network reads is never decoded in halves.

use serde_json::Value;

/// A classified upstream line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Frame(Value),
    /// `data: [DONE]`
    Done,
    /// A `data:` line whose payload is not JSON. Skipped by the caller.
    Malformed(String),
}

/// Longest upstream line kept, in bytes. Longer lines are dropped whole.
pub const MAX_LINE_BYTES: usize = 4 * 1_048_576;

/// Incremental line splitter over raw bytes.
#[derive(Debug)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Prefix of `buf` already searched for a newline.
    scanned: usize,
    /// Set while skipping the rest of an over-long line.
    discarding: bool,
    max_line: usize,
    dropped: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_line_limit(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line_limit(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            discarding: false,
            max_line,
            dropped: 0,
        }
    }

    /// Feed bytes, returning every line completed by them (without the
    /// trailing `\n` or `\r\n`). Lines over the limit are skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut bytes = bytes;
        if self.discarding {
            match bytes.iter().position(|&b| b == b'\n') {
                None => return lines,
                Some(pos) => {
                    self.discarding = false;
                    bytes = &bytes[pos + 1..];
                }
            }
        }

        self.buf.extend_from_slice(bytes);
        let mut start = 0;
        let mut from = self.scanned;
        while let Some(pos) = self.buf[from..].iter().position(|&b| b == b'\n') {
            let end = from + pos;
            if end - start > self.max_line {
                self.drop_line(end - start);
            } else {
                lines.push(decode_line(&self.buf[start..end]));
            }
            start = end + 1;
            from = start;
        }
        self.buf.drain(..start);
        self.scanned = self.buf.len();

        if self.buf.len() > self.max_line {
            self.drop_line(self.buf.len());
            self.buf.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    /// The unterminated tail left at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || self.buf.is_empty() {
            return None;
        }
        let line = decode_line(&self.buf);
        self.buf.clear();
        Some(line)
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Lines skipped for exceeding the limit.
    pub fn dropped_lines(&self) -> usize {
        self.dropped
    }

    fn drop_line(&mut self, len: usize) {
        self.dropped += 1;
        tracing::warn!(len, limit = self.max_line, "dropping over-long upstream line");
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Classify one line. Blank lines, comments and non-data fields
/// (`event:`, `id:`, `retry:`) yield `None`.
pub fn classify_line(line: &str) -> Option<SseEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str::<Value>(data) {
        Ok(v) => Some(SseEvent::Frame(v)),
        Err(_) => Some(SseEvent::Malformed(data.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lines_split_across_pushes_are_joined() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: {\"a\"").is_empty());
        let lines = d.push(b":1}\n\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
        assert_eq!(d.buffered_len(), 0);
    }

    #[test]
    fn utf8_sequence_split_between_reads_survives() {
        let text = "data: {\"content\":\"héllo\"}\n";
        let bytes = text.as_bytes();
        let split = text.find('é').unwrap() + 1; // inside the two-byte sequence
        let mut d = SseDecoder::new();
        assert!(d.push(&bytes[..split]).is_empty());
        let lines = d.push(&bytes[split..]);
        assert_eq!(lines, vec!["data: {\"content\":\"héllo\"}"]);
    }

    #[test]
    fn crlf_is_stripped() {
        let mut d = SseDecoder::new();
        assert_eq!(d.push(b"data: [DONE]\r\n"), vec!["data: [DONE]"]);
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut d = SseDecoder::new();
        d.push(b"data: [DONE]");
        assert_eq!(d.finish().as_deref(), Some("data: [DONE]"));
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn byte_at_a_time_input_yields_the_line() {
        let text = b"data: {\"content\":\"abc\"}\n";
        let mut d = SseDecoder::new();
        let mut lines = Vec::new();
        for b in text.iter() {
            lines.extend(d.push(std::slice::from_ref(b)));
        }
        assert_eq!(lines, vec!["data: {\"content\":\"abc\"}"]);
        assert_eq!(d.buffered_len(), 0);
    }

    #[test]
    fn over_long_partial_line_is_dropped_and_buffer_released() {
        let mut d = SseDecoder::with_line_limit(16);
        assert!(d.push(b"data: 0123456789").is_empty());
        assert!(d.push(b"abcdef").is_empty());
        assert_eq!(d.buffered_len(), 0);
        assert!(d.push(b"more junk").is_empty());
        assert_eq!(d.buffered_len(), 0);

        let lines = d.push(b"tail\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: [DONE]"]);
        assert_eq!(d.dropped_lines(), 1);
    }

    #[test]
    fn over_long_complete_line_is_skipped() {
        let mut d = SseDecoder::with_line_limit(16);
        let lines = d.push(b"data: 0123456789abcdef\ndata: ok\n");
        assert_eq!(lines, vec!["data: ok"]);
        assert_eq!(d.dropped_lines(), 1);
    }

    #[test]
    fn finish_after_dropped_tail_returns_nothing() {
        let mut d = SseDecoder::with_line_limit(4);
        d.push(b"data: too long");
        assert_eq!(d.finish(), None);
    }

    #[test]
    fn classification() {
        assert_eq!(classify_line(""), None);
        assert_eq!(classify_line(": keep-alive"), None);
        assert_eq!(classify_line("event: message"), None);
        assert_eq!(classify_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(classify_line("data:{\"x\":1}"), Some(SseEvent::Frame(json!({"x": 1}))));
        assert_eq!(
            classify_line("data: {broken"),
            Some(SseEvent::Malformed("{broken".into()))
        );
    }
}
