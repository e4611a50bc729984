//! Accumulates a relayed reply as it arrives.

use crate::utf8::Utf8Decoder;

/// Transcript of one streamed reply.
///
/// Feeding the reply in any number of reads yields the same transcript as
/// decoding it in one piece.
#[derive(Debug, Default)]
pub struct StreamConsumer {
    transcript: String,
    utf8: Utf8Decoder,
    reads: usize,
}

impl StreamConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one read and return the transcript so far.
    pub fn push(&mut self, bytes: &[u8]) -> &str {
        self.reads += 1;
        let text = self.utf8.decode(bytes);
        self.transcript.push_str(&text);
        &self.transcript
    }

    pub fn finish(&mut self) -> &str {
        let tail = self.utf8.finish();
        self.transcript.push_str(&tail);
        &self.transcript
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn into_transcript(mut self) -> String {
        self.finish();
        self.transcript
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incremental_equals_whole() {
        let reply = "before \n<details class=\"thinking-block\">推理</details> after ✓";
        let bytes = reply.as_bytes();

        for size in [1, 2, 3, 5, 7] {
            let mut consumer = StreamConsumer::new();
            for chunk in bytes.chunks(size) {
                consumer.push(chunk);
            }
            assert_eq!(consumer.into_transcript(), reply, "read size {size}");
        }
    }

    #[test]
    fn test_push_returns_running_transcript() {
        let mut consumer = StreamConsumer::new();
        assert_eq!(consumer.push(b"Hel"), "Hel");
        assert_eq!(consumer.push(b"lo"), "Hello");
        assert_eq!(consumer.reads(), 2);
    }
}
