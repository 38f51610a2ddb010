//! Incremental server-sent-events line decoder.
//!
//! The transport hands us arbitrary byte chunks: a chunk may end mid-line or
//! mid-character. `SseDecoder` keeps the undecoded tail between calls and
//! only turns a line into text once its terminating newline has arrived, so
//! a multi-byte character split across chunks is decoded intact.
//!
//! The decoder knows nothing about HTTP; it is a pure transformation from a
//! chunk to zero or more events.

/// An event recognized in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of a `data:` line, trimmed.
    Data(String),
    /// The literal `[DONE]` terminal marker.
    Done,
}

use tracing::warn;

/// Most bytes buffered while waiting for a newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

#[derive(Debug)]
pub struct SseDecoder {
    /// Bytes received after the last newline.
    pending: Vec<u8>,
    /// Set once the terminal marker was seen; later input is ignored.
    done: bool,
    /// Dropping the rest of an oversize line until its newline arrives.
    skipping: bool,
    max_line_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            done: false,
            skipping: false,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the cap on buffered, still unterminated bytes. A line that
    /// outgrows it is discarded through its newline.
    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Whether the terminal marker has been decoded.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed one transport chunk, returning the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }

        let chunk = if self.skipping {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(offset) => {
                    self.skipping = false;
                    &chunk[offset + 1..]
                }
                None => return events,
            }
        } else {
            chunk
        };

        self.pending.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
            let line_end = consumed + offset;
            let event = decode_line(&self.pending[consumed..line_end]);
            consumed = line_end + 1;

            if let Some(event) = event {
                let is_done = event == SseEvent::Done;
                events.push(event);
                if is_done {
                    self.done = true;
                    self.pending.clear();
                    return events;
                }
            }
        }

        self.pending.drain(..consumed);

        if self.pending.len() > self.max_line_bytes {
            warn!(
                bytes = self.pending.len(),
                limit = self.max_line_bytes,
                "Discarding oversize event-stream line"
            );
            self.pending.clear();
            self.skipping = true;
        }
        events
    }

    /// Flush a final line that arrived without a trailing newline.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        if self.done || self.skipping || self.pending.is_empty() {
            self.pending.clear();
            self.skipping = false;
            return Vec::new();
        }

        let line = std::mem::take(&mut self.pending);
        match decode_line(&line) {
            Some(event) => {
                self.done = event == SseEvent::Done;
                vec![event]
            }
            None => Vec::new(),
        }
    }
}

/// Interpret one complete line. Comments, keep-alives, `event:`/`id:` fields
/// and blank lines yield nothing.
fn decode_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();

    let data = line.strip_prefix(DATA_PREFIX)?.trim();
    if data == DONE_MARKER {
        return Some(SseEvent::Done);
    }
    if data.is_empty() {
        return None;
    }
    Some(SseEvent::Data(data.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> SseEvent {
        SseEvent::Data(s.to_string())
    }

    #[test]
    fn complete_lines_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(events, vec![data("{\"a\":1}"), data("{\"b\":2}")]);
    }

    #[test]
    fn partial_line_is_buffered_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"con").is_empty());
        assert!(decoder.feed(b"tent\":\"hi\"}").is_empty());
        let events = decoder.feed(b"\n");
        assert_eq!(events, vec![data("{\"content\":\"hi\"}")]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let line = "data: héllo ✓\n".as_bytes();
        // Split inside the three-byte check mark.
        let split = line.len() - 3;
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&line[..split]).is_empty());
        let events = decoder.feed(&line[split..]);
        assert_eq!(events, vec![data("héllo ✓")]);
    }

    #[test]
    fn control_lines_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\nevent: message\nid: 7\nretry: 100\ndata:\n\r\n");
        assert!(events.is_empty());
    }

    #[test]
    fn crlf_line_endings() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: x\r\n\r\n");
        assert_eq!(events, vec![data("x")]);
    }

    #[test]
    fn done_marker_stops_decoding() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: a\ndata: [DONE]\ndata: b\n");
        assert_eq!(events, vec![data("a"), SseEvent::Done]);
        assert!(decoder.is_done());

        assert!(decoder.feed(b"data: c\n").is_empty());
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec![data("tail")]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn byte_at_a_time() {
        let input = b"data: one\n\ndata: two\n\ndata: [DONE]\n";
        let mut decoder = SseDecoder::new();
        let mut events = Vec::new();
        for byte in input.iter() {
            events.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(events, vec![data("one"), data("two"), SseEvent::Done]);
    }

    #[test]
    fn oversize_line_is_dropped_and_decoding_resumes() {
        let mut decoder = SseDecoder::new().with_max_line_bytes(16);
        assert_eq!(
            decoder.feed(b"data: ok\ndata: aaaaaaaaaaaaaaaaaaaa"),
            vec![data("ok")]
        );
        assert!(decoder.feed(b"bbbbbbbbbbbbbbbbbbbbbbbb").is_empty());
        let events = decoder.feed(b"cc\ndata: after\n");
        assert_eq!(events, vec![data("after")]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn oversize_tail_is_not_flushed() {
        let mut decoder = SseDecoder::new().with_max_line_bytes(8);
        assert!(decoder.feed(b"data: 0123456789").is_empty());
        assert!(decoder.finish().is_empty());
    }
}
