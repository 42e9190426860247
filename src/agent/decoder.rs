//! Incremental line decoder for the streaming chat body
//!
//! Network chunks split lines (and UTF-8 sequences) at arbitrary points.
//! Bytes are buffered until a full `\n`-terminated line is available, so a
//! line is only surfaced once it has completely arrived.

use super::events::{parse_event, StreamEvent};
use tracing::warn;

const DATA_PREFIX: &str = "data: ";

/// Result of decoding one complete line
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedLine {
    Event(StreamEvent),
    /// A `data:` line whose payload did not parse; dropped
    Malformed(String),
    /// Blank lines, comments and other SSE fields
    Ignored,
}

/// Carry-over buffer that turns byte chunks into decoded lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    carry: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completes, in order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodedLine> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=pos).collect();
            lines.push(decode_line(&line[..line.len() - 1]));
        }
        lines
    }

    /// Flush a final line that was not newline-terminated
    pub fn finish(&mut self) -> Option<DecodedLine> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.carry);
        Some(decode_line(&rest))
    }

    /// Bytes held back waiting for a line terminator
    pub fn pending_len(&self) -> usize {
        self.carry.len()
    }
}

fn decode_line(raw: &[u8]) -> DecodedLine {
    let text = String::from_utf8_lossy(raw);
    let line = text.strip_suffix('\r').unwrap_or(&text);

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return DecodedLine::Ignored;
    };

    match parse_event(payload) {
        Ok(event) => DecodedLine::Event(event),
        Err(e) => {
            warn!("[Stream] Error parsing line: {} ({})", e, payload);
            DecodedLine::Malformed(payload.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(lines: Vec<DecodedLine>) -> Vec<StreamEvent> {
        lines
            .into_iter()
            .filter_map(|l| match l {
                DecodedLine::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = LineDecoder::new();

        let first = decoder.feed(b"data: {\"type\":\"respon");
        assert!(first.is_empty());
        assert!(decoder.pending_len() > 0);

        let second = decoder.feed(b"se\",\"content\":\"Hi\"}\n");
        assert_eq!(events(second), vec![StreamEvent::ResponseToken("Hi".into())]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(
            b"data: {\"type\":\"phase\",\"phase\":\"thinking\"}\n\ndata: {\"type\":\"thinking\",\"content\":\"a\"}\r\n",
        );
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], DecodedLine::Ignored);
        assert_eq!(
            events(lines),
            vec![
                StreamEvent::Phase("thinking".into()),
                StreamEvent::ThinkingToken("a".into())
            ]
        );
    }

    #[test]
    fn test_utf8_split_inside_character() {
        let mut decoder = LineDecoder::new();
        let line = "data: {\"type\":\"response\",\"content\":\"caf\u{e9}\"}\n".as_bytes();
        // Split in the middle of the two-byte é
        let split = line.iter().position(|&b| b == 0xC3).unwrap() + 1;

        assert!(decoder.feed(&line[..split]).is_empty());
        let lines = decoder.feed(&line[split..]);
        assert_eq!(events(lines), vec![StreamEvent::ResponseToken("café".into())]);
    }

    #[test]
    fn test_malformed_line_is_reported_not_fatal() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b"data: {oops\ndata: {\"type\":\"done\"}\n");
        assert!(matches!(lines[0], DecodedLine::Malformed(_)));
        assert_eq!(events(lines), vec![StreamEvent::Done(vec![])]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"data: {\"type\":\"done\"}").is_empty());
        assert_eq!(
            decoder.finish(),
            Some(DecodedLine::Event(StreamEvent::Done(vec![])))
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.feed(b": keepalive\nevent: message\n");
        assert_eq!(lines, vec![DecodedLine::Ignored, DecodedLine::Ignored]);
    }
}
