//! Request body framing: `Content-Length`-delimited and chunked decoders.
//!
//! Both variants present the same incremental interface (feed bytes in as
//! they arrive from the socket, get decoded body bytes out) so the
//! connection task can drive either one from the same read loop.

use crate::errors::ErrorKind;

/// Per-request body framing, selected once from the preamble per §4.1's
/// chunked-wins-over-Content-Length rule.
pub(crate) enum BodyReader {
    /// No body expected (no `Content-Length`, no `Transfer-Encoding: chunked`).
    None,
    /// `Content-Length`-framed body; `remaining` counts bytes left to read.
    Fixed { remaining: usize },
    /// `Transfer-Encoding: chunked` body.
    Chunked(ChunkedDecoder),
}

impl BodyReader {
    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        match self {
            BodyReader::None => true,
            BodyReader::Fixed { remaining } => *remaining == 0,
            BodyReader::Chunked(decoder) => decoder.is_done(),
        }
    }

    /// Feeds more raw input bytes, appending decoded body bytes to `out` and
    /// enforcing `max_body` (the resolved per-Content-Type ceiling from
    /// [`crate::config::BodySizeLimits`]). Returns the number of bytes of
    /// `input` that were consumed; bytes past that point belong to the next
    /// request (pipelining) or haven't arrived yet.
    pub(crate) fn feed(
        &mut self,
        input: &[u8],
        out: &mut Vec<u8>,
        max_body: usize,
    ) -> Result<usize, ErrorKind> {
        match self {
            BodyReader::None => Ok(0),
            BodyReader::Fixed { remaining } => {
                let take = (*remaining).min(input.len());
                if out.len() + take > max_body {
                    return Err(ErrorKind::BodyTooLarge);
                }
                out.extend_from_slice(&input[..take]);
                *remaining -= take;
                Ok(take)
            }
            BodyReader::Chunked(decoder) => decoder.feed(input, out, max_body),
        }
    }
}

// CHUNKED DECODER

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    SizeExt,
    Data,
    DataCrlf,
    Trailer,
    Done,
}

/// Incremental decoder for `Transfer-Encoding: chunked` bodies.
///
/// States mirror RFC 7230 §4.1's grammar: `ChunkSize [";"ext] CRLF` followed
/// by that many octets and a CRLF, repeated until a zero-size chunk, then an
/// optional trailer section terminated by an empty line. Trailers are
/// scanned for but discarded (§4.2's resolved Open Question).
#[derive(Debug)]
pub(crate) struct ChunkedDecoder {
    state: State,
    size_acc: usize,
    digits_seen: u32,
    remaining_in_chunk: usize,
    trailer_line_empty: bool,
}

impl ChunkedDecoder {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Size,
            size_acc: 0,
            digits_seen: 0,
            remaining_in_chunk: 0,
            trailer_line_empty: true,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    fn feed(&mut self, input: &[u8], out: &mut Vec<u8>, max_body: usize) -> Result<usize, ErrorKind> {
        let mut i = 0;

        while i < input.len() && self.state != State::Done {
            match self.state {
                State::Size => match hex_val(input[i]) {
                    Some(digit) => {
                        self.digits_seen += 1;
                        // 32 hex digits is the widest chunk size this decoder accepts.
                        if self.digits_seen > 32 {
                            return Err(ErrorKind::InvalidChunkSize);
                        }
                        self.size_acc = self
                            .size_acc
                            .checked_shl(4)
                            .ok_or(ErrorKind::InvalidChunkSize)?
                            | digit as usize;
                        i += 1;
                    }
                    None => match input[i] {
                        b';' => {
                            self.state = State::SizeExt;
                            i += 1;
                        }
                        b'\r' => {
                            i += 1;
                        }
                        b'\n' => {
                            self.end_of_size_line(out, max_body)?;
                            i += 1;
                        }
                        _ => return Err(ErrorKind::InvalidChunkSize),
                    },
                },
                State::SizeExt => match input[i] {
                    b'\r' => {
                        i += 1;
                    }
                    b'\n' => {
                        self.end_of_size_line(out, max_body)?;
                        i += 1;
                    }
                    _ => {
                        i += 1;
                    }
                },
                State::Data => {
                    let take = self.remaining_in_chunk.min(input.len() - i);
                    out.extend_from_slice(&input[i..i + take]);
                    self.remaining_in_chunk -= take;
                    i += take;
                    if self.remaining_in_chunk == 0 {
                        self.state = State::DataCrlf;
                    }
                }
                State::DataCrlf => match input[i] {
                    b'\r' => {
                        i += 1;
                    }
                    b'\n' => {
                        self.state = State::Size;
                        i += 1;
                    }
                    _ => return Err(ErrorKind::InvalidChunkSize),
                },
                State::Trailer => {
                    match input[i] {
                        b'\r' => {}
                        b'\n' => {
                            if self.trailer_line_empty {
                                self.state = State::Done;
                            }
                            self.trailer_line_empty = true;
                        }
                        _ => self.trailer_line_empty = false,
                    }
                    i += 1;
                }
                State::Done => unreachable!(),
            }
        }

        Ok(i)
    }

    fn end_of_size_line(&mut self, out: &Vec<u8>, max_body: usize) -> Result<(), ErrorKind> {
        if self.size_acc == 0 {
            self.state = State::Trailer;
        } else {
            if out.len() + self.size_acc > max_body {
                return Err(ErrorKind::BodyTooLarge);
            }
            self.remaining_in_chunk = self.size_acc;
            self.state = State::Data;
        }
        self.size_acc = 0;
        self.digits_seen = 0;
        Ok(())
    }
}

#[inline(always)]
fn hex_val(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        let input = b"5\r\nhello\r\n0\r\n\r\n";
        let consumed = decoder.feed(input, &mut out, 1024).unwrap();

        assert_eq!(consumed, input.len());
        assert!(decoder.is_done());
        assert_eq!(out, b"hello");
    }

    #[test]
    fn multiple_chunks() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        let input = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        decoder.feed(input, &mut out, 1024).unwrap();

        assert!(decoder.is_done());
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn fed_byte_by_byte() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        for &byte in b"5\r\nhello\r\n0\r\n\r\n" {
            decoder.feed(&[byte], &mut out, 1024).unwrap();
        }

        assert!(decoder.is_done());
        assert_eq!(out, b"hello");
    }

    #[test]
    fn chunk_extension_is_ignored() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        decoder
            .feed(b"5;ignored=ext\r\nhello\r\n0\r\n\r\n", &mut out, 1024)
            .unwrap();

        assert!(decoder.is_done());
        assert_eq!(out, b"hello");
    }

    #[test]
    fn trailers_discarded() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        let input = b"3\r\nabc\r\n0\r\nX-Trailer: value\r\n\r\n";
        let consumed = decoder.feed(input, &mut out, 1024).unwrap();

        assert_eq!(consumed, input.len());
        assert!(decoder.is_done());
        assert_eq!(out, b"abc");
    }

    #[test]
    fn hex_chunk_size() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        let body = vec![b'x'; 0xA];
        let input = [b"a\r\n".as_ref(), &body, b"\r\n0\r\n\r\n"].concat();
        decoder.feed(&input, &mut out, 1024).unwrap();

        assert!(decoder.is_done());
        assert_eq!(out, body);
    }

    #[test]
    fn over_max_body_errors() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        assert_eq!(
            decoder.feed(b"5\r\nhello\r\n", &mut out, 4),
            Err(ErrorKind::BodyTooLarge)
        );
    }

    #[test]
    fn invalid_size_digit_errors() {
        let mut decoder = ChunkedDecoder::new();
        let mut out = Vec::new();

        assert_eq!(
            decoder.feed(b"z\r\n", &mut out, 1024),
            Err(ErrorKind::InvalidChunkSize)
        );
    }

    #[test]
    fn fixed_reader_basic() {
        let mut reader = BodyReader::Fixed { remaining: 5 };
        let mut out = Vec::new();

        let consumed = reader.feed(b"hello world", &mut out, 1024).unwrap();

        assert_eq!(consumed, 5);
        assert_eq!(out, b"hello");
        assert!(reader.is_done());
    }

    #[test]
    fn fixed_reader_over_max_body() {
        let mut reader = BodyReader::Fixed { remaining: 10 };
        let mut out = Vec::new();

        assert_eq!(
            reader.feed(b"0123456789", &mut out, 4),
            Err(ErrorKind::BodyTooLarge)
        );
    }

    #[test]
    fn none_reader_is_always_done() {
        let reader = BodyReader::None;
        assert!(reader.is_done());
    }
}
