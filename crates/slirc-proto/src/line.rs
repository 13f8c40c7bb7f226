//! Line framing for tokio.
//!
//! The decoder yields raw byte lines of bounded size; charset conversion
//! happens afterwards in [`decode_line`] so a server's encoding can change
//! mid-stream (005 `CHARSET`, `/charset`).

use std::borrow::Cow;

use bytes::BytesMut;
use encoding::Encoding;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::error;

/// Receive buffer capacity: 8191 bytes of tags plus a 512-byte body.
pub const DEFAULT_LINE_CAPACITY: usize = 8703;

/// One received line, without its terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    /// Raw bytes.
    pub bytes: Vec<u8>,
    /// The line was longer than the codec capacity and was cut.
    pub truncated: bool,
}

/// Newline-delimited codec with a fixed capacity.
///
/// `\n` terminates a line and a `\r` right before it is dropped. A line
/// longer than the capacity is cut at the capacity, returned with
/// `truncated` set, and the remainder up to the next `\n` is discarded.
#[derive(Debug)]
pub struct LineCodec {
    capacity: usize,
    encoding: &'static Encoding,
    next_index: usize,
    discarding: bool,
}

impl LineCodec {
    /// Codec with the default capacity, sending UTF-8.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LINE_CAPACITY)
    }

    /// Codec with a custom capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        LineCodec {
            capacity: capacity.max(1),
            encoding: encoding::UTF_8,
            next_index: 0,
            discarding: false,
        }
    }

    /// Charset used for outgoing lines.
    pub fn set_encoding(&mut self, encoding: &'static Encoding) {
        self.encoding = encoding;
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Line;
    type Error = error::ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> error::Result<Option<Line>> {
        loop {
            if self.discarding {
                match src.iter().position(|b| *b == b'\n') {
                    Some(offset) => {
                        let _ = src.split_to(offset + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            if let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') {
                let end = self.next_index + offset;
                let mut line = src.split_to(end + 1);
                self.next_index = 0;
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                let truncated = line.len() > self.capacity;
                if truncated {
                    warn!(len = line.len(), capacity = self.capacity, "line truncated");
                    line.truncate(self.capacity);
                }
                return Ok(Some(Line {
                    bytes: line.to_vec(),
                    truncated,
                }));
            }

            // A full-length line may still be waiting for the `\n` after its `\r`.
            let limit = match src.last() {
                Some(b'\r') => self.capacity + 1,
                _ => self.capacity,
            };
            if src.len() > limit {
                warn!(capacity = self.capacity, "line exceeds buffer, truncating");
                let line = src.split_to(self.capacity);
                self.next_index = 0;
                self.discarding = true;
                return Ok(Some(Line {
                    bytes: line.to_vec(),
                    truncated: true,
                }));
            }

            self.next_index = src.len();
            return Ok(None);
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = error::ProtocolError;

    fn encode(&mut self, msg: String, dst: &mut BytesMut) -> error::Result<()> {
        let body = msg.trim_end_matches(['\r', '\n']);
        let (bytes, _enc, _had_errors) = self.encoding.encode(body);
        dst.reserve(bytes.len() + 2);
        dst.extend_from_slice(&bytes);
        dst.extend_from_slice(b"\r\n");
        Ok(())
    }
}

/// Decode a received line.
///
/// Valid UTF-8 is taken as is. Otherwise the bytes are converted from
/// `encoding`; every invalid sequence becomes `?`. When `encoding` is UTF-8
/// itself the offending bytes are skipped one at a time, so the work is
/// bounded by the line length.
pub fn decode_line(bytes: &[u8], encoding: &'static Encoding) -> String {
    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_owned();
    }

    if encoding != encoding::UTF_8 {
        let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
        return match (text, had_errors) {
            (Cow::Borrowed(s), false) => s.to_owned(),
            (text, false) => text.into_owned(),
            (text, true) => text.replace('\u{FFFD}', "?"),
        };
    }

    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                out.push_str(valid);
                break;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                // valid_up_to() marks a UTF-8 boundary
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                out.push('?');
                rest = &after[e.error_len().unwrap_or(1).min(after.len())..];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, input: &[u8]) -> Vec<Line> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(line) = codec.decode(&mut buf).unwrap() {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_crlf_and_bare_lf() {
        let mut codec = LineCodec::new();
        let lines = decode_all(&mut codec, b"PING :a\r\nPING :b\nPART\r");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].bytes, b"PING :a");
        assert_eq!(lines[1].bytes, b"PING :b");
    }

    #[test]
    fn test_inner_cr_kept() {
        let mut codec = LineCodec::new();
        let lines = decode_all(&mut codec, b"a\rb\r\n");
        assert_eq!(lines[0].bytes, b"a\rb");
    }

    #[test]
    fn test_partial_line_across_reads() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #c :hel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"lo\r\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.bytes, b"PRIVMSG #c :hello");
        assert!(!line.truncated);
    }

    #[test]
    fn test_overlong_line_truncated_then_resyncs() {
        let mut codec = LineCodec::with_capacity(8);
        let mut buf = BytesMut::from(&b"0123456789abc"[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.bytes, b"01234567");
        assert!(first.truncated);

        buf.extend_from_slice(b"def\nnext\n");
        let next = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.bytes, b"next");
        assert!(!next.truncated);
    }

    #[test]
    fn test_full_length_line_split_before_lf() {
        let mut codec = LineCodec::with_capacity(4);
        let mut buf = BytesMut::from(&b"abcd\r"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"\n");
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.bytes, b"abcd");
        assert!(!line.truncated);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_overlong_complete_line() {
        let mut codec = LineCodec::with_capacity(4);
        let lines = decode_all(&mut codec, b"abcdefgh\nok\n");
        assert_eq!(lines[0].bytes, b"abcd");
        assert!(lines[0].truncated);
        assert_eq!(lines[1].bytes, b"ok");
    }

    #[test]
    fn test_encode_appends_crlf_and_converts() {
        let mut codec = LineCodec::new();
        codec.set_encoding(encoding::WINDOWS_1252);
        let mut buf = BytesMut::new();
        codec.encode("PRIVMSG #c :caf\u{e9}\r\n".to_owned(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"PRIVMSG #c :caf\xe9\r\n");
    }

    #[test]
    fn test_decode_line_fallbacks() {
        assert_eq!(decode_line("h\u{e9}".as_bytes(), encoding::UTF_8), "h\u{e9}");
        assert_eq!(decode_line(b"caf\xe9", encoding::WINDOWS_1252), "caf\u{e9}");
        assert_eq!(decode_line(b"a\xffb\xfe", encoding::UTF_8), "a?b?");
    }
}
