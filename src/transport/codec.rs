//! Message framing for the JSON-RPC byte stream
//!
//! The decoder yields raw frames as strings. JSON parsing happens one layer
//! up so that a malformed frame can be dropped without ending the stream.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{CopilotError, Result};

/// Default maximum frame size (1MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Upper bound for a Content-Length header block
const MAX_HEADER_SIZE: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Framing used in both directions of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// One JSON message per line
    #[default]
    NewlineDelimited,
    /// `Content-Length: N\r\n\r\n` followed by N bytes of JSON
    ContentLength,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Looking for the next line or header block
    Head,
    /// Waiting for a body of the given length
    Body(usize),
    /// Dropping an oversized body
    Skip(usize),
    /// Dropping an oversized line up to its newline
    SkipLine,
}

/// Codec for JSON-RPC frames
#[derive(Debug, Clone)]
pub struct JsonRpcCodec {
    framing: Framing,
    max_frame_size: usize,
    state: DecodeState,
    scanned: usize,
}

impl JsonRpcCodec {
    /// Create a codec with the given framing and frame size limit
    #[must_use]
    pub fn new(framing: Framing, max_frame_size: usize) -> Self {
        Self {
            framing,
            max_frame_size,
            state: DecodeState::Head,
            scanned: 0,
        }
    }

    /// Framing in use
    #[must_use]
    pub const fn framing(&self) -> Framing {
        self.framing
    }

    fn decode_line(&mut self, src: &mut BytesMut) -> Option<String> {
        loop {
            let newline = src[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| self.scanned + offset);

            if self.state == DecodeState::SkipLine {
                match newline {
                    Some(pos) => {
                        src.advance(pos + 1);
                        self.scanned = 0;
                        self.state = DecodeState::Head;
                        continue;
                    }
                    None => {
                        src.clear();
                        self.scanned = 0;
                        return None;
                    }
                }
            }

            let Some(pos) = newline else {
                if src.len() > self.max_frame_size {
                    log::warn!(
                        "Discarding inbound frame larger than {} bytes",
                        self.max_frame_size
                    );
                    src.clear();
                    self.scanned = 0;
                    self.state = DecodeState::SkipLine;
                } else {
                    self.scanned = src.len();
                }
                return None;
            };

            let line = src.split_to(pos + 1);
            self.scanned = 0;
            if pos > self.max_frame_size {
                log::warn!(
                    "Discarding inbound frame of {pos} bytes (limit {})",
                    self.max_frame_size
                );
                continue;
            }
            if let Some(frame) = frame_from_bytes(trim_line(&line[..pos])) {
                return Some(frame);
            }
        }
    }

    fn decode_content_length(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            match self.state {
                DecodeState::Body(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let body = src.split_to(len);
                    self.state = DecodeState::Head;
                    if let Some(frame) = frame_from_bytes(&body) {
                        return Ok(Some(frame));
                    }
                }
                DecodeState::Skip(remaining) => {
                    let n = remaining.min(src.len());
                    src.advance(n);
                    if n < remaining {
                        self.state = DecodeState::Skip(remaining - n);
                        return Ok(None);
                    }
                    self.state = DecodeState::Head;
                }
                DecodeState::Head | DecodeState::SkipLine => {
                    let Some(end) = src
                        .windows(HEADER_TERMINATOR.len())
                        .position(|w| w == HEADER_TERMINATOR)
                    else {
                        if src.len() > MAX_HEADER_SIZE {
                            return Err(CopilotError::transport(format!(
                                "header block exceeds {MAX_HEADER_SIZE} bytes"
                            )));
                        }
                        return Ok(None);
                    };
                    let header = src.split_to(end + HEADER_TERMINATOR.len());
                    match parse_content_length(&header[..end]) {
                        Some(len) if len > self.max_frame_size => {
                            log::warn!(
                                "Discarding inbound frame of {len} bytes (limit {})",
                                self.max_frame_size
                            );
                            self.state = DecodeState::Skip(len);
                        }
                        Some(len) => self.state = DecodeState::Body(len),
                        None => log::warn!("Dropping header block without Content-Length"),
                    }
                }
            }
        }
    }
}

impl Default for JsonRpcCodec {
    fn default() -> Self {
        Self::new(Framing::default(), DEFAULT_MAX_FRAME_SIZE)
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn frame_from_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s.to_string()),
        Err(e) => {
            log::warn!("Dropping inbound frame with invalid UTF-8: {e}");
            None
        }
    }
}

fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    header.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

impl Decoder for JsonRpcCodec {
    type Item = String;
    type Error = CopilotError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        match self.framing {
            Framing::NewlineDelimited => Ok(self.decode_line(src)),
            Framing::ContentLength => self.decode_content_length(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if self.framing == Framing::NewlineDelimited
            && self.state == DecodeState::Head
            && !src.is_empty()
        {
            let rest = src.split_to(src.len());
            self.scanned = 0;
            return Ok(frame_from_bytes(trim_line(&rest)));
        }
        src.clear();
        Ok(None)
    }
}

impl Encoder<String> for JsonRpcCodec {
    type Error = CopilotError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        match self.framing {
            Framing::NewlineDelimited => {
                dst.reserve(item.len() + 1);
                dst.put_slice(item.as_bytes());
                dst.put_u8(b'\n');
            }
            Framing::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", item.len());
                dst.reserve(header.len() + item.len());
                dst.put_slice(header.as_bytes());
                dst.put_slice(item.as_bytes());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut JsonRpcCodec, input: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(input);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn newline_frames_split_and_trim() {
        let mut codec = JsonRpcCodec::default();
        let frames = decode_all(&mut codec, b"{\"a\":1}\r\n\n{\"b\":2}\n{\"c\"");
        assert_eq!(frames, vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn partial_line_completes_on_next_read() {
        let mut codec = JsonRpcCodec::default();
        let mut buf = BytesMut::from(&b"{\"a\""[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b":1}\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn oversized_line_is_skipped() {
        let mut codec = JsonRpcCodec::new(Framing::NewlineDelimited, 8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"tail\n{}\n");
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn content_length_frames() {
        let mut codec = JsonRpcCodec::new(Framing::ContentLength, DEFAULT_MAX_FRAME_SIZE);
        let frames = decode_all(
            &mut codec,
            b"Content-Length: 7\r\n\r\n{\"a\":1}content-length:2\r\n\r\n{}",
        );
        assert_eq!(frames, vec!["{\"a\":1}", "{}"]);
    }

    #[test]
    fn content_length_oversized_body_is_skipped() {
        let mut codec = JsonRpcCodec::new(Framing::ContentLength, 4);
        let frames = decode_all(
            &mut codec,
            b"Content-Length: 10\r\n\r\n0123456789Content-Length: 2\r\n\r\n{}",
        );
        assert_eq!(frames, vec!["{}"]);
    }

    #[test]
    fn encoder_adds_framing() {
        let mut codec = JsonRpcCodec::new(Framing::ContentLength, DEFAULT_MAX_FRAME_SIZE);
        let mut dst = BytesMut::new();
        codec.encode("{}".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"Content-Length: 2\r\n\r\n{}");

        let mut codec = JsonRpcCodec::default();
        let mut dst = BytesMut::new();
        codec.encode("{}".to_string(), &mut dst).unwrap();
        assert_eq!(&dst[..], b"{}\n");
    }

    #[test]
    fn trailing_line_is_yielded_at_eof() {
        let mut codec = JsonRpcCodec::default();
        let mut buf = BytesMut::from(&b"{\"last\":true}"[..]);
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap().as_deref(),
            Some("{\"last\":true}")
        );
    }
}
