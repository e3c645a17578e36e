use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::Frame;

/// Escape a header token for wire transmission.
///
/// Per STOMP 1.2, the following characters must be escaped in header names
/// and values:
/// - backslash (0x5c) → `\\`
/// - carriage return (0x0d) → `\r`
/// - line feed (0x0a) → `\n`
/// - colon (0x3a) → `\c`
fn escape_header(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => result.push_str("\\\\"),
            '\r' => result.push_str("\\r"),
            '\n' => result.push_str("\\n"),
            ':' => result.push_str("\\c"),
            _ => result.push(ch),
        }
    }
    result
}

/// Reverse [`escape_header`] with a single left-to-right pass, so `\\c`
/// correctly yields `\c` rather than a colon. Escape sequences outside the
/// defined set are passed through untouched.
fn unescape_header(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('r') => result.push('\r'),
            Some('n') => result.push('\n'),
            Some('c') => result.push(':'),
            Some('\\') => result.push('\\'),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }
    result
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn header_str(raw: &[u8]) -> Result<&str, io::Error> {
    std::str::from_utf8(raw).map_err(|e| invalid_data(format!("invalid utf8 in header: {}", e)))
}

/// Locate the line starting at `from`. Returns the line with its terminator
/// stripped (LF or CRLF) and the index just past the LF, or `None` when the
/// terminator has not been buffered yet.
fn next_line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
    let rel = buf[from..].iter().position(|&b| b == b'\n')?;
    let mut line = &buf[from..from + rel];
    if let [head @ .., b'\r'] = line {
        line = head;
    }
    Some((line, from + rel + 1))
}

/// Items produced or consumed by the codec.
///
/// A `StompItem` is either a decoded `Frame` or a `Heartbeat` marker
/// representing a single LF received on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StompItem {
    /// A decoded STOMP frame (command + headers + body)
    Frame(Frame),
    /// A single heartbeat pulse (LF)
    Heartbeat,
}

/// `StompCodec` implements `tokio_util::codec::{Decoder, Encoder}` for the
/// STOMP 1.2 wire protocol.
///
/// Responsibilities:
/// - Decode incoming bytes into `StompItem::Frame` or `StompItem::Heartbeat`,
///   accepting LF and CRLF line endings.
/// - Unescape header names and values, keeping the first occurrence of a
///   repeated header.
/// - Honour `content-length` as authoritative for the body size; without it,
///   the body runs to the terminating NUL.
/// - Encode `StompItem` back into bytes, emitting LF line endings only.
pub struct StompCodec {}

impl StompCodec {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for StompCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for StompCodec {
    type Item = StompItem;
    type Error = io::Error;

    /// Decode bytes from `src` into a `StompItem`.
    ///
    /// Returns
    /// - `Ok(Some(StompItem))` when a full item (frame or heartbeat) was
    ///   decoded; the consumed bytes are removed from `src`.
    /// - `Ok(None)` when more bytes are required, leaving `src` untouched.
    /// - `Err(io::Error)` with `InvalidData` on malformed input: a header
    ///   line without `:`, a body disagreeing with `content-length`, or
    ///   bytes that are not valid UTF-8 where text is required.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // Heartbeat: an isolated LF, or CRLF from dialects that send it.
        if src[0] == b'\n' {
            src.advance(1);
            return Ok(Some(StompItem::Heartbeat));
        }
        if src[0] == b'\r' {
            if src.len() < 2 {
                return Ok(None);
            }
            if src[1] == b'\n' {
                src.advance(2);
                return Ok(Some(StompItem::Heartbeat));
            }
            return Err(invalid_data("bare CR outside a line ending"));
        }

        let buf = src.as_ref();

        let Some((command_raw, mut pos)) = next_line(buf, 0) else {
            return Ok(None);
        };
        let command = header_str(command_raw)?.to_string();

        // Header lines until the empty line. First occurrence of a name wins;
        // repeats are dropped here so lookups never see them.
        let mut headers: Vec<(String, String)> = Vec::new();
        let body_start;
        loop {
            let Some((line, next)) = next_line(buf, pos) else {
                return Ok(None);
            };
            pos = next;
            if line.is_empty() {
                body_start = pos;
                break;
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| invalid_data("header line missing ':'"))?;
            let name = unescape_header(header_str(&line[..colon])?);
            let value = unescape_header(header_str(&line[colon + 1..])?);
            if !headers.iter().any(|(k, _)| *k == name) {
                headers.push((name, value));
            }
        }

        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.trim().parse::<usize>().ok());

        let body_end = match content_length {
            Some(len) => {
                // content-length is authoritative: exactly `len` octets, then
                // the terminating NUL.
                let end = body_start
                    .checked_add(len)
                    .ok_or_else(|| invalid_data("content-length overflows"))?;
                if buf.len() <= end {
                    return Ok(None);
                }
                if buf[end] != 0 {
                    return Err(invalid_data("body length disagrees with content-length"));
                }
                end
            }
            None => match buf[body_start..].iter().position(|&b| b == 0) {
                Some(rel) => body_start + rel,
                None => return Ok(None),
            },
        };

        let body = buf[body_start..body_end].to_vec();

        // Consume through the NUL, plus the optional trailing LF when it is
        // already buffered (broker dialects differ on emitting it).
        let mut consumed = body_end + 1;
        if consumed < buf.len() && buf[consumed] == b'\n' {
            consumed += 1;
        }
        src.advance(consumed);

        Ok(Some(StompItem::Frame(Frame {
            command,
            headers,
            body,
        })))
    }
}

impl Encoder<StompItem> for StompCodec {
    type Error = io::Error;

    /// Encode a `StompItem` into the destination buffer.
    ///
    /// A frame is written as the command, the escaped header lines, an empty
    /// line, the body verbatim, and a terminating NUL. A heartbeat is a
    /// single LF.
    fn encode(&mut self, item: StompItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            StompItem::Heartbeat => {
                dst.put_u8(b'\n');
            }
            StompItem::Frame(frame) => {
                dst.extend_from_slice(frame.command.as_bytes());
                dst.put_u8(b'\n');

                for (k, v) in &frame.headers {
                    dst.extend_from_slice(escape_header(k).as_bytes());
                    dst.put_u8(b':');
                    dst.extend_from_slice(escape_header(v).as_bytes());
                    dst.put_u8(b'\n');
                }

                dst.put_u8(b'\n');
                dst.extend_from_slice(&frame.body);
                dst.put_u8(0);
            }
        }

        Ok(())
    }
}
