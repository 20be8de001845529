use bytes::BytesMut;
use serde_json::Value as JsonValue;

use crate::error::{ProxyError, ProxyResult};

/// Initial / maximum SSE line-buffer sizes (spec §4.2 "reads line-oriented
/// data with a buffer ≥ 64 KiB initial and ≥ 1 MiB maximum").
pub const INITIAL_BUFFER_BYTES: usize = 64 * 1024;
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024;

const DONE_LITERAL: &str = "[DONE]";

/// Incremental line splitter over raw upstream byte chunks, grounded on the
/// teacher's own hand-rolled line reader rather than a dedicated SSE crate
/// (spec §4.2 "[ADD]"): the buffer-sizing invariants are spec-mandated and
/// easiest to enforce directly against a growable byte buffer.
pub struct SseLineSplitter {
    buf: BytesMut,
}

impl Default for SseLineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SseLineSplitter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_BYTES),
        }
    }

    /// Appends a chunk and returns every complete line found so far
    /// (stripped of the terminating `\n`/`\r\n`). Returns an error if the
    /// buffer grows past `MAX_BUFFER_BYTES` without a newline.
    pub fn push(&mut self, chunk: &[u8]) -> ProxyResult<Vec<String>> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > MAX_BUFFER_BYTES {
            return Err(ProxyError::BufferOverflow(MAX_BUFFER_BYTES));
        }
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        Ok(lines)
    }
}

/// Outcome of parsing one line of SSE input (spec §4.2 "Streaming").
pub enum SseEvent {
    Data(JsonValue),
    Done,
    Ignored,
}

/// Parses a single SSE line: `data: [DONE]` terminates the stream; a
/// `data: ` prefixed line is parsed as JSON; anything else (blank lines,
/// comments, `event:` lines) is ignored.
pub fn parse_sse_line(line: &str) -> SseEvent {
    let Some(payload) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
        return SseEvent::Ignored;
    };
    let payload = payload.trim();
    if payload == DONE_LITERAL {
        return SseEvent::Done;
    }
    match serde_json::from_str::<JsonValue>(payload) {
        Ok(value) => SseEvent::Data(value),
        Err(_) => SseEvent::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines_and_buffers_partial() {
        let mut splitter = SseLineSplitter::new();
        let lines = splitter.push(b"data: {\"a\":1}\ndata: partial").unwrap();
        assert_eq!(lines, vec!["data: {\"a\":1}".to_string()]);
        let lines = splitter.push(b" rest\n").unwrap();
        assert_eq!(lines, vec!["data: partial rest".to_string()]);
    }

    #[test]
    fn strips_trailing_carriage_return() {
        let mut splitter = SseLineSplitter::new();
        let lines = splitter.push(b"data: x\r\n").unwrap();
        assert_eq!(lines, vec!["data: x".to_string()]);
    }

    #[test]
    fn overflow_without_newline_errors() {
        let mut splitter = SseLineSplitter::new();
        let chunk = vec![b'a'; MAX_BUFFER_BYTES + 1];
        assert!(matches!(splitter.push(&chunk), Err(ProxyError::BufferOverflow(_))));
    }

    #[test]
    fn parses_done_literal() {
        assert!(matches!(parse_sse_line("data: [DONE]"), SseEvent::Done));
    }

    #[test]
    fn parses_data_json() {
        match parse_sse_line("data: {\"x\":1}") {
            SseEvent::Data(value) => assert_eq!(value["x"], 1),
            _ => panic!("expected data event"),
        }
    }

    #[test]
    fn ignores_non_data_lines() {
        assert!(matches!(parse_sse_line(": keep-alive"), SseEvent::Ignored));
        assert!(matches!(parse_sse_line(""), SseEvent::Ignored));
    }
}
