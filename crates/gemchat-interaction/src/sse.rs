//! Incremental server-sent-events frame decoder.
//!
//! Turns the raw byte chunks of a streaming HTTP body into `data:` payloads.
//! Chunks may end anywhere, including inside a line or inside a multi-byte
//! UTF-8 codepoint; bytes are buffered until a full line is available and only
//! complete lines are decoded as UTF-8. A `\n` byte never occurs inside a
//! multi-byte sequence, so splitting on it is always safe.

use thiserror::Error;

/// Marker that introduces a payload line.
pub const DATA_PREFIX: &str = "data:";

/// Payload that terminates the logical stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Upper bound for one buffered line.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// One decoded unit of the event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Payload of one `data:` line, prefix removed.
    Data(String),
    /// The sentinel was seen; nothing after it is decoded.
    Done,
}

/// Problems with a single line or payload. None of them are fatal to a
/// stream: the offending frame is logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("line is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("line exceeds {limit} bytes and was discarded")]
    LineTooLong { limit: usize },

    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("payload has no text at candidates[0].content.parts[0].text")]
    MissingText,
}

/// Stateful SSE line decoder.
///
/// Feed it chunks in arrival order with [`feed`](Self::feed); call
/// [`finish`](Self::finish) once the transport reports end of body so a final
/// line without a trailing newline is not lost.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_line_bytes: usize,
    /// Set while skipping the remainder of an oversized line.
    discarding: bool,
    finished: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
            discarding: false,
            finished: false,
        }
    }

    /// Whether the sentinel (or end of body) has been processed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of bytes held back waiting for a newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes every complete line in `chunk` and keeps the trailing partial
    /// line for the next call.
    ///
    /// Once [`Frame::Done`] has been returned, further input is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.finished || chunk.is_empty() {
            return frames;
        }

        let mut rest = chunk;
        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            let segment = &rest[..newline];
            rest = &rest[newline + 1..];

            if self.discarding {
                self.discarding = false;
                self.buffer.clear();
                continue;
            }
            if self.buffer.len() + segment.len() > self.max_line_bytes {
                self.report_oversized();
                self.buffer.clear();
                continue;
            }

            self.buffer.extend_from_slice(segment);
            let line = std::mem::take(&mut self.buffer);
            match decode_line(&line) {
                Some(Frame::Done) => {
                    frames.push(Frame::Done);
                    self.finished = true;
                    return frames;
                }
                Some(frame) => frames.push(frame),
                None => {}
            }
        }

        if !self.discarding && !rest.is_empty() {
            if self.buffer.len() + rest.len() > self.max_line_bytes {
                self.report_oversized();
                self.buffer.clear();
                self.discarding = true;
            } else {
                self.buffer.extend_from_slice(rest);
            }
        }

        frames
    }

    /// Flushes a buffered final line that arrived without a newline.
    ///
    /// Some servers omit the newline after the last event; the leftover bytes
    /// are decoded as one last candidate line. The decoder is finished
    /// afterwards.
    pub fn finish(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        self.finished = true;

        let line = std::mem::take(&mut self.buffer);
        if self.discarding || line.is_empty() {
            return None;
        }
        decode_line(&line)
    }

    fn report_oversized(&self) {
        tracing::warn!(
            "Skipping SSE line: {}",
            FrameError::LineTooLong {
                limit: self.max_line_bytes
            }
        );
    }
}

/// Decodes one complete line. Returns `None` for lines that carry no payload.
fn decode_line(raw: &[u8]) -> Option<Frame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line,
        Err(e) => {
            tracing::warn!(
                "Skipping SSE line: {}",
                FrameError::InvalidUtf8(e.to_string())
            );
            return None;
        }
    };

    // Comments, blank separators, `event:` and `id:` fields are not payloads.
    let payload = line.strip_prefix(DATA_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    if payload.trim() == DONE_SENTINEL {
        return Some(Frame::Done);
    }
    if payload.trim().is_empty() {
        return None;
    }
    Some(Frame::Data(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        ": keep-alive comment\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Recur\"}]}}]}\n",
        "\n",
        "event: message\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"sión 🎉 はい\"}]}}]}\r\n",
        "\r\n",
        "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"!\"}]}}]}\n",
        "data: [DONE]\n",
    );

    fn feed_all(decoder: &mut FrameDecoder, chunks: &[&[u8]]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(decoder.feed(chunk));
        }
        frames.extend(decoder.finish());
        frames
    }

    fn decode_whole(bytes: &[u8]) -> Vec<Frame> {
        feed_all(&mut FrameDecoder::new(), &[bytes])
    }

    #[test]
    fn test_decodes_data_lines_and_sentinel() {
        let frames = decode_whole(STREAM.as_bytes());
        assert_eq!(frames.len(), 4);
        assert!(matches!(&frames[0], Frame::Data(p) if p.contains("Recur")));
        assert!(matches!(&frames[1], Frame::Data(p) if p.contains("sión 🎉 はい")));
        assert!(matches!(&frames[2], Frame::Data(p) if p.contains("\"!\"")));
        assert_eq!(frames[3], Frame::Done);
    }

    #[test]
    fn test_every_two_way_split_matches_whole() {
        let bytes = STREAM.as_bytes();
        let expected = decode_whole(bytes);

        for split in 0..=bytes.len() {
            let (head, tail) = bytes.split_at(split);
            let frames = feed_all(&mut FrameDecoder::new(), &[head, tail]);
            assert_eq!(frames, expected, "split at byte {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time_matches_whole() {
        let bytes = STREAM.as_bytes();
        let expected = decode_whole(bytes);

        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(feed_all(&mut FrameDecoder::new(), &chunks), expected);

        let chunks: Vec<&[u8]> = bytes.chunks(7).collect();
        assert_eq!(feed_all(&mut FrameDecoder::new(), &chunks), expected);
    }

    #[test]
    fn test_split_inside_multibyte_codepoint() {
        let line = "data: 🎉\n".as_bytes();
        // The emoji is four bytes starting at offset 6
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&line[..8]).is_empty());
        let frames = decoder.feed(&line[8..]);
        assert_eq!(frames, vec![Frame::Data("🎉".to_string())]);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(b"data: par");
        let before = decoder.buffered_len();

        assert!(decoder.feed(b"").is_empty());
        assert_eq!(decoder.buffered_len(), before);
    }

    #[test]
    fn test_partial_line_is_buffered() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: {\"a\":").is_empty());
        assert_eq!(decoder.buffered_len(), 11);
        assert_eq!(
            decoder.feed(b"1}\n"),
            vec![Frame::Data("{\"a\":1}".to_string())]
        );
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_unterminated_final_line_is_flushed() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"data: last").is_empty());
        assert_eq!(decoder.finish(), Some(Frame::Data("last".to_string())));
        assert!(decoder.is_finished());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_sentinel_terminates_once() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"data: a\ndata: [DONE]\ndata: b\n");
        assert_eq!(frames, vec![Frame::Data("a".to_string()), Frame::Done]);

        assert!(decoder.feed(b"data: c\ndata: [DONE]\n").is_empty());
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_non_data_lines_are_ignored() {
        let frames = decode_whole(b"event: ping\nid: 4\nretry: 10\n:comment\ndatum: x\n\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn test_prefix_without_space_is_accepted() {
        let frames = decode_whole(b"data:{\"x\":1}\n");
        assert_eq!(frames, vec![Frame::Data("{\"x\":1}".to_string())]);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut bytes = b"data: ".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(b"\ndata: ok\n");

        assert_eq!(decode_whole(&bytes), vec![Frame::Data("ok".to_string())]);
    }

    #[test]
    fn test_oversized_line_is_discarded_and_decoder_recovers() {
        let mut decoder = FrameDecoder::with_max_line_bytes(16);
        assert!(decoder.feed(b"data: aaaaaaaaaaaaaaaa").is_empty());
        assert!(decoder.feed(b"aaaaaaaa").is_empty());
        let frames = decoder.feed(b"aaa\ndata: ok\n");
        assert_eq!(frames, vec![Frame::Data("ok".to_string())]);
    }
}
