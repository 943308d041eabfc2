//! Incremental frame parser
//!
//! The deck writes messages back to back with no framing beyond line
//! endings, so a single socket read can hold half a message, exactly one, or
//! the tail of one block immediately followed by the status line of the next.
//! [`FrameParser`] buffers raw bytes and yields complete messages in order.
//!
//! Framing rules:
//! - `NNN text\r\n` is a single-line reply; a bare `NNN\r\n` has empty text.
//! - `NNN name:\r\n` opens a block of `key: value` lines closed by `\r\n`.
//! - A status line met inside a block closes that block and starts the next
//!   message (split frame).

use bytes::{Buf, BytesMut};

use crate::error::{Error, Result};
use crate::message::{Block, ProtocolMessage, StatusCode};

/// Maximum bytes buffered without producing a message (8MB).
///
/// A whole clip catalog is one message, so this must hold tens of
/// thousands of rows.
pub const MAX_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Streaming decoder for deck messages
#[derive(Debug)]
pub struct FrameParser {
    buf: BytesMut,
    max_buffer: usize,
    /// Skipping the remainder of a malformed block
    discarding: bool,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_max_buffer(MAX_BUFFER_SIZE)
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_buffer,
            discarding: false,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of bytes waiting for a complete message
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drain every complete message currently buffered
    pub fn messages(&mut self) -> Messages<'_> {
        Messages { parser: self }
    }

    /// Decode the next complete message.
    ///
    /// Returns `None` when more input is needed. Errors are not fatal: the
    /// offending input is consumed and parsing can continue.
    pub fn next_message(&mut self) -> Option<Result<ProtocolMessage>> {
        let next = self.decode_next();
        if next.is_none() && self.buf.len() > self.max_buffer {
            let size = self.buf.len();
            self.buf.clear();
            self.discarding = false;
            return Some(Err(Error::BufferOverflow {
                size,
                max: self.max_buffer,
            }));
        }
        next
    }

    fn decode_next(&mut self) -> Option<Result<ProtocolMessage>> {
        loop {
            let (line, next) = read_line(&self.buf, 0)?;

            if self.discarding {
                if line.is_empty() || split_status_line(&line).is_none() {
                    self.discarding = !line.is_empty();
                    self.buf.advance(next);
                    continue;
                }
                self.discarding = false;
            }

            if line.is_empty() {
                self.buf.advance(next);
                continue;
            }

            let Some((code, rest)) = split_status_line(&line) else {
                self.buf.advance(next);
                return Some(Err(Error::MalformedResponse(line)));
            };

            return match rest.strip_suffix(':') {
                Some(name) => {
                    let name = name.to_string();
                    self.decode_block(code, name, next)
                }
                None => {
                    let message = ProtocolMessage::text(code, rest);
                    self.buf.advance(next);
                    Some(Ok(message))
                }
            };
        }
    }

    /// Decode block fields starting at `start`; nothing is consumed until the
    /// block is complete
    fn decode_block(
        &mut self,
        code: StatusCode,
        name: String,
        start: usize,
    ) -> Option<Result<ProtocolMessage>> {
        let mut block = Block::new(name);
        let mut pos = start;

        loop {
            let (line, next) = read_line(&self.buf, pos)?;

            if line.is_empty() {
                self.buf.advance(next);
                return Some(Ok(ProtocolMessage::block(code, block)));
            }

            // Split frame: the next message began before this block was closed
            if split_status_line(&line).is_some() {
                self.buf.advance(pos);
                return Some(Ok(ProtocolMessage::block(code, block)));
            }

            match split_field(&line) {
                Some((key, value)) => {
                    block.insert(key, value);
                    pos = next;
                }
                None => {
                    self.buf.advance(next);
                    self.discarding = true;
                    return Some(Err(Error::MalformedResponse(line)));
                }
            }
        }
    }
}

/// Iterator over buffered messages
pub struct Messages<'a> {
    parser: &'a mut FrameParser,
}

impl Iterator for Messages<'_> {
    type Item = Result<ProtocolMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_message()
    }
}

/// Parse a complete chunk of text in one go.
///
/// Any trailing incomplete message is dropped.
pub fn parse_all(input: &str) -> Vec<Result<ProtocolMessage>> {
    let mut parser = FrameParser::new();
    parser.push(input.as_bytes());
    parser.messages().collect()
}

/// Line starting at `start` without its terminator, plus the offset just past it
fn read_line(buf: &[u8], start: usize) -> Option<(String, usize)> {
    let offset = buf.get(start..)?.iter().position(|&b| b == b'\n')?;
    let end = start + offset;
    let mut line = &buf[start..end];
    if let Some(stripped) = line.strip_suffix(b"\r") {
        line = stripped;
    }
    Some((String::from_utf8_lossy(line).into_owned(), end + 1))
}

/// Split `NNN rest` into its code and text
fn split_status_line(line: &str) -> Option<(StatusCode, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let rest = match bytes.get(3) {
        None => "",
        Some(b' ') => &line[4..],
        Some(_) => return None,
    };
    let code = line[..3].parse().ok()?;
    Some((code, rest))
}

fn split_field(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    if key.is_empty() {
        return None;
    }
    Some((key, value.strip_prefix(' ').unwrap_or(value)))
}
