//! SSE decoding of the inference backend stream
//!
//! The backend emits records of the form `data: {"chunk": "..."}\n\n`.
//! [`SseDecoder`] turns arbitrary byte reads into [`SseEvent`]s, holding back
//! incomplete records and incomplete UTF-8 sequences until the next read.

use serde_json::Value;
use tracing::warn;

use crate::utf8::Utf8Decoder;

const RECORD_DELIMITER: &str = "\n\n";

/// One logical event extracted from an upstream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Text to relay.
    Chunk(String),
    /// Normal end of the reply.
    Done,
    /// The backend reported a failure.
    Error(String),
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Decoded text not yet terminated by a record delimiter.
    buffer: String,
    utf8: Utf8Decoder,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one upstream read; returns the events of every record it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let text = self.utf8.decode(bytes);
        self.buffer.push_str(&text);
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find(RECORD_DELIMITER) {
            let record: String = self.buffer.drain(..pos + RECORD_DELIMITER.len()).collect();
            parse_record(&record[..pos], &mut events);
        }
        events
    }

    /// Parse whatever is left once the upstream body has ended.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut tail = std::mem::take(&mut self.buffer);
        tail.push_str(&self.utf8.finish());

        let mut events = Vec::new();
        if !tail.trim().is_empty() {
            parse_record(tail.trim_end(), &mut events);
        }
        events
    }

    /// Whether a partial record is still buffered.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty() || self.utf8.has_pending()
    }
}

fn parse_record(record: &str, events: &mut Vec<SseEvent>) {
    for line in record.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);

        if data.trim() == "[DONE]" {
            events.push(SseEvent::Done);
            continue;
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping malformed upstream record ({}): {}", e, data);
                continue;
            }
        };

        if let Some(chunk) = payload.get("chunk").and_then(Value::as_str) {
            events.push(SseEvent::Chunk(chunk.to_string()));
        }
        if payload.get("done").is_some_and(is_truthy) {
            events.push(SseEvent::Done);
        }
        match payload.get("error") {
            None | Some(Value::Null) => {}
            Some(Value::String(msg)) => events.push(SseEvent::Error(msg.clone())),
            Some(other) => events.push(SseEvent::Error(other.to_string())),
        }
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"chunk\": \"Hello\"}\n\n");
        assert_eq!(events, vec![SseEvent::Chunk("Hello".into())]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_record_split_across_reads() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"chu").is_empty());
        assert!(decoder.push(b"nk\": \"Hi\"}\n").is_empty());
        assert!(decoder.has_partial());
        let events = decoder.push(b"\ndata: {\"done\": true}\n\n");
        assert_eq!(events, vec![SseEvent::Chunk("Hi".into()), SseEvent::Done]);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let mut decoder = SseDecoder::new();
        let record = "data: {\"chunk\": \"思考\"}\n\n".as_bytes();
        // Split inside the first three-byte character.
        let split = record.iter().position(|&b| b >= 0x80).unwrap() + 1;
        assert!(decoder.push(&record[..split]).is_empty());
        let events = decoder.push(&record[split..]);
        assert_eq!(events, vec![SseEvent::Chunk("思考".into())]);
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {not json}\n\ndata: {\"chunk\": \"ok\"}\n\n");
        assert_eq!(events, vec![SseEvent::Chunk("ok".into())]);
    }

    #[test]
    fn test_error_and_crlf() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"error\": \"model offline\"}\r\n\r\n");
        assert_eq!(events, vec![SseEvent::Error("model offline".into())]);
    }

    #[test]
    fn test_chunk_then_done_in_one_payload() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"chunk\": \"end\", \"done\": 1}\n\n");
        assert_eq!(events, vec![SseEvent::Chunk("end".into()), SseEvent::Done]);
    }

    #[test]
    fn test_done_sentinel_and_non_data_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"event: message\nid: 7\ndata: [DONE]\n\n");
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn test_finish_flushes_unterminated_record() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"chunk\": \"tail\"}").is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Chunk("tail".into())]);
        assert!(decoder.finish().is_empty());
    }
}
