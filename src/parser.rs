//! Chunk-boundary tolerant SSE frame parser
//!
//! [`parse`] is pure: it returns every complete frame in the buffer plus the
//! unterminated tail, which the caller prepends to the next chunk.
//! [`FrameParser`] does that bookkeeping for you.

use crate::{
    constants::{CR, LF, MESSAGE_EVENT},
    frame::Frame,
};

/// Splits a slice at the next LF. Returns the non-inclusive end of the line (with a trailing CR
/// stripped so CRLF and LF read the same) and the inclusive start of the rest.
/// Returns [None] if the slice holds no complete line yet.
fn find_eol(bytes: &[u8]) -> Option<(usize, usize)> {
    let lf = memchr::memchr(LF, bytes)?;
    let line_end = match lf.checked_sub(1) {
        Some(before) if bytes[before] == CR => before,
        _ => lf,
    };
    Some((line_end, lf + 1))
}

/// A field line split into name and value, the value having lost one leading space
fn split_field(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
        None => (line, ""),
    }
}

#[derive(Debug, Default)]
struct BlockBuilder {
    event: Option<String>,
    data: Option<String>,
}

impl BlockBuilder {
    fn add(&mut self, line: &str) {
        // comments
        if line.starts_with(':') {
            return;
        }

        match split_field(line) {
            ("event", value) => {
                let value = value.trim();
                if !value.is_empty() {
                    self.event = Some(value.to_owned());
                }
            }
            ("data", value) => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_owned()),
            },
            // id, retry and unknown fields carry nothing the feed uses
            _ => (),
        }
    }

    fn finish(&mut self) -> Option<Frame> {
        let BlockBuilder { event, data } = core::mem::take(self);
        if event.is_none() && data.is_none() {
            return None;
        }

        Some(Frame {
            event: event.unwrap_or_else(|| MESSAGE_EVENT.to_owned()),
            data: data.unwrap_or_default(),
        })
    }
}

/// Parses every complete frame out of `buffer`.
///
/// A frame is complete once it is followed by a blank line; runs of blank lines count as one
/// boundary. Everything after the last boundary is returned untouched as the remainder, even
/// when it looks like a full block, because the rest of it may still be in flight.
pub fn parse(buffer: &str) -> (Vec<Frame>, &str) {
    let bytes = buffer.as_bytes();
    let mut frames = Vec::new();
    let mut block = BlockBuilder::default();
    let mut cursor = 0;
    let mut consumed = 0;

    while let Some((line_end, next)) = find_eol(&bytes[cursor..]) {
        // LF and CR are ascii so these offsets always sit on char boundaries
        let line = &buffer[cursor..cursor + line_end];
        cursor += next;

        if line.is_empty() {
            if let Some(frame) = block.finish() {
                frames.push(frame);
            }
            consumed = cursor;
        } else {
            block.add(line);
        }
    }

    (frames, &buffer[consumed..])
}

/// Incremental wrapper around [`parse`] that carries the remainder between chunks
#[derive(Debug, Clone, Default)]
pub struct FrameParser {
    remainder: String,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` to the carried remainder and returns the frames it completed
    pub fn feed(&mut self, chunk: &str) -> Vec<Frame> {
        self.remainder.push_str(chunk);
        let (frames, rest) = parse(&self.remainder);
        let consumed = self.remainder.len() - rest.len();
        self.remainder.drain(..consumed);
        frames
    }

    /// Text received so far that does not yet form a complete frame
    pub fn remainder(&self) -> &str {
        &self.remainder
    }

    /// Drops any partial frame, used when the underlying connection is replaced
    pub fn clear(&mut self) {
        self.remainder.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "event: live\ndata: {\"P_In\":0.036,\"P_Out\":0}\n\n\
                          : keepalive\n\n\
                          data: first\ndata: second\n\n\n\n\
                          event: live\r\ndata: {\"P_In\":1.5}\r\n\r\n\
                          event: status\n\n";

    fn whole() -> Vec<Frame> {
        let (frames, rest) = parse(STREAM);
        assert_eq!(rest, "");
        frames
    }

    #[test]
    fn parses_whole_stream() {
        assert_eq!(
            whole(),
            vec![
                Frame::new("live", "{\"P_In\":0.036,\"P_Out\":0}"),
                Frame::message("first\nsecond"),
                Frame::new("live", "{\"P_In\":1.5}"),
                Frame::new("status", ""),
            ]
        );
    }

    #[test]
    fn two_chunk_live_frame() {
        let chunk1 = "event: live\ndata: {\"P_In\":1";
        let chunk2 = ",\"P_Out\":0}\n\n";

        let (frames, rest) = parse(chunk1);
        assert!(frames.is_empty());
        assert_eq!(rest, chunk1);

        let joined = format!("{rest}{chunk2}");
        let (frames, rest) = parse(&joined);
        assert_eq!(frames, vec![Frame::new("live", "{\"P_In\":1,\"P_Out\":0}")]);
        assert_eq!(rest, "");
    }

    #[test]
    fn any_single_split_matches_whole() {
        let expected = whole();
        for split in (0..=STREAM.len()).filter(|&i| STREAM.is_char_boundary(i)) {
            let mut parser = FrameParser::new();
            let mut frames = parser.feed(&STREAM[..split]);
            frames.extend(parser.feed(&STREAM[split..]));
            assert_eq!(frames, expected, "split at {split}");
            assert_eq!(parser.remainder(), "");
        }
    }

    #[test]
    fn any_double_split_matches_whole() {
        let text = "event: live\r\ndata: {\"a\":1}\r\n\r\ndata: x\n\n";
        let (expected, _) = parse(text);
        for first in 0..=text.len() {
            for second in first..=text.len() {
                let mut parser = FrameParser::new();
                let mut frames = parser.feed(&text[..first]);
                frames.extend(parser.feed(&text[first..second]));
                frames.extend(parser.feed(&text[second..]));
                assert_eq!(frames, expected, "splits at {first}/{second}");
            }
        }
    }

    #[test]
    fn byte_by_byte_feed() {
        let mut parser = FrameParser::new();
        let frames: Vec<_> = STREAM
            .char_indices()
            .flat_map(|(i, c)| parser.feed(&STREAM[i..i + c.len_utf8()]))
            .collect();
        assert_eq!(frames, whole());
    }

    #[test]
    fn unterminated_block_is_kept() {
        // a single newline is not a boundary
        let (frames, rest) = parse("event: live\ndata: {}\n");
        assert!(frames.is_empty());
        assert_eq!(rest, "event: live\ndata: {}\n");

        let (frames, rest) = parse("data: a\n\ndata: b");
        assert_eq!(frames, vec![Frame::message("a")]);
        assert_eq!(rest, "data: b");
    }

    #[test]
    fn empty_blocks_are_discarded() {
        let (frames, rest) = parse("\n\n\r\n: only a comment\n\nid: 7\nretry: 100\n\n");
        assert!(frames.is_empty());
        assert_eq!(rest, "");
    }

    #[test]
    fn leading_space_trimmed_once() {
        let (frames, _) = parse("data:no-space\n\ndata:  two spaces\n\nevent:   padded  \ndata\n\n");
        assert_eq!(
            frames,
            vec![
                Frame::message("no-space"),
                Frame::message(" two spaces"),
                Frame::new("padded", ""),
            ]
        );
    }

    #[test]
    fn data_keeps_colons() {
        let (frames, _) = parse("data: {\"time\":\"12:30:00\"}\n\n");
        assert_eq!(frames, vec![Frame::message("{\"time\":\"12:30:00\"}")]);
    }

    #[test]
    fn garbage_never_panics() {
        let inputs = [
            "\r\r\r\n\n",
            ":::\n\n",
            "data\r\n\r\n",
            "\u{1F431}: cat\n\n",
            "event\n\n",
            "\r",
            "",
        ];
        for input in inputs {
            let (frames, rest) = parse(input);
            assert!(frames.len() <= 1, "{input:?}");
            assert!(input.ends_with(rest));
        }
    }

    #[test]
    fn clear_forgets_partial_frame() {
        let mut parser = FrameParser::new();
        assert!(parser.feed("data: half").is_empty());
        parser.clear();
        assert_eq!(parser.feed("data: whole\n\n"), vec![Frame::message("whole")]);
    }
}
