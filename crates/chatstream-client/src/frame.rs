//! Line framing for the response stream.
//!
//! The upstream protocol is `data: <json>` lines terminated by `data: [DONE]`. Chunk boundaries
//! do not line up with lines, so bytes are buffered until a newline arrives. Lines without the
//! `data: ` prefix are dropped without error.

use tracing::trace;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// One `data: ` line with the prefix stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub raw_text: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Line {
    Frame(Frame),
    Done,
    Skip,
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once the `[DONE]` sentinel was seen; later input is ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Clears buffered bytes and the done flag for a new stream.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.done = false;
    }

    /// Appends a chunk and returns every frame completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if self.done {
            return Vec::new();
        }
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            match decode_line(&line[..idx]) {
                Line::Frame(frame) => frames.push(frame),
                Line::Done => {
                    self.done = true;
                    self.buf.clear();
                    break;
                }
                Line::Skip => {}
            }
        }
        frames
    }

    /// Flushes a final line that was not newline-terminated when the stream closed.
    pub fn finish(&mut self) -> Vec<Frame> {
        if self.done || self.buf.is_empty() {
            self.buf.clear();
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buf);
        match decode_line(&line) {
            Line::Frame(frame) => vec![frame],
            Line::Done => {
                self.done = true;
                Vec::new()
            }
            Line::Skip => Vec::new(),
        }
    }
}

fn decode_line(bytes: &[u8]) -> Line {
    let text = String::from_utf8_lossy(bytes);
    let line = text.trim_end_matches('\r');
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        if !line.trim().is_empty() {
            trace!(line = %line, "dropping non-data line");
        }
        return Line::Skip;
    };
    if payload.trim() == DONE_SENTINEL {
        return Line::Done;
    }
    if payload.trim().is_empty() {
        return Line::Skip;
    }
    Line::Frame(Frame {
        raw_text: payload.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(frames: Vec<Frame>) -> Vec<String> {
        frames.into_iter().map(|f| f.raw_text).collect()
    }

    #[test]
    fn decoder_handles_partial_chunk_boundaries() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_chunk(b"data: {\"type\":\"sta").is_empty());
        let frames = decoder.push_chunk(b"rt\"}\ndata: {\"type\":\"end\"}\n");
        assert_eq!(texts(frames), vec![r#"{"type":"start"}"#, r#"{"type":"end"}"#]);
    }

    #[test]
    fn multibyte_characters_split_across_chunks_survive() {
        let line = "data: {\"t\":\"héllo\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_chunk(&line[..split]).is_empty());
        assert_eq!(texts(decoder.push_chunk(&line[split..])), vec!["{\"t\":\"héllo\"}"]);
    }

    #[test]
    fn non_data_lines_are_dropped_and_crlf_is_trimmed() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push_chunk(b": keepalive\r\nevent: message\r\ndata: {}\r\n\r\n");
        assert_eq!(texts(frames), vec!["{}"]);
    }

    #[test]
    fn done_sentinel_terminates_without_a_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push_chunk(b"data: {\"a\":1}\ndata: [DONE]\ndata: {\"b\":2}\n");
        assert_eq!(texts(frames), vec!["{\"a\":1}"]);
        assert!(decoder.is_done());
        assert!(decoder.push_chunk(b"data: {\"c\":3}\n").is_empty());
        decoder.reset();
        assert!(!decoder.is_done());
    }

    #[test]
    fn finish_flushes_unterminated_last_line() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.push_chunk(b"data: {\"type\":\"end\"}").is_empty());
        assert_eq!(texts(decoder.finish()), vec![r#"{"type":"end"}"#]);
        assert!(decoder.finish().is_empty());
    }
}
