//! Incremental Server-Sent-Events framing.
//!
//! [`SseDecoder`] turns arbitrary byte chunks (as delivered by
//! `reqwest::Response::bytes_stream`) into complete [`SseEvent`]s. It only
//! handles the wire format; payload interpretation lives in
//! [`crate::messages`].

/// One dispatched event. The job streams only use `data:`; `event:`,
/// `id:` and `retry:` are accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// All `data:` lines of the event joined with `\n`.
    pub data: String,
}

/// Stateful line/field parser.
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes of an incomplete line carried over between chunks.
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every event it completed, in order.
    ///
    /// Lines may be split across chunks at any byte, including inside a
    /// multi-byte UTF-8 sequence.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.process_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush at end of stream.
    ///
    /// A trailing line without newline is processed, and an event that
    /// was never terminated by a blank line is still dispatched.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            // Comment / keep-alive.
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => self.data.push(value.to_string()),
            "event" | "id" | "retry" => {}
            other => tracing::trace!(field = other, "Ignoring unknown SSE field"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent { data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.data.as_str()).collect()
    }

    #[test]
    fn single_chunk_multiple_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"text\":\"x\"}\n\ndata: DONE\n\n");
        assert_eq!(data(&events), vec![r#"{"text":"x"}"#, "DONE"]);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"te").is_empty());
        assert!(decoder.push(b"xt\":\"y\"}\r\n").is_empty());
        let events = decoder.push(b"\r\n");
        assert_eq!(data(&events), vec![r#"{"text":"y"}"#]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let bytes = "data: café\n\n".as_bytes();
        // "data: caf" is 9 bytes; split inside the two-byte 'é'.
        assert!(decoder.push(&bytes[..10]).is_empty());
        let events = decoder.push(&bytes[10..]);
        assert_eq!(data(&events), vec!["café"]);
    }

    #[test]
    fn multi_line_data_and_fields() {
        let mut decoder = SseDecoder::new();
        let events =
            decoder.push(b": keep-alive\nretry: 3000\nevent: log\nid: 7\ndata: a\ndata: b\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(data(&events), vec!["a\nb"]);
    }

    #[test]
    fn blank_lines_without_data_dispatch_nothing() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"\n\nevent: ping\n\n").is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().map(|e| e.data), Some("tail".to_string()));
        assert!(decoder.finish().is_none());
    }
}
