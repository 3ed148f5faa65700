//! Framing shared by requests and responses (RFC 2326 §4).
//!
//! ```text
//! start-line CRLF
//! *(header CRLF)
//! CRLF
//! [Content-Length bytes of body]
//! ```

use std::io::{self, BufRead, Read, Write};

use bytes::Bytes;

use super::header::{HeaderMap, RtspHeader};
use crate::error::{Error, ParseErrorKind, Result};

/// Longest start or header line accepted, terminator included.
pub(crate) const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Largest `Content-Length` accepted.
pub(crate) const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Read one line without its `\n` or `\r\n` terminator. `None` on EOF.
pub(crate) fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let read = reader
        .by_ref()
        .take(MAX_LINE_LENGTH as u64)
        .read_until(b'\n', &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    } else if read == MAX_LINE_LENGTH {
        return Err(Error::parse(ParseErrorKind::LineTooLong));
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Read the first non-blank line. `None` on a clean end of stream.
pub(crate) fn read_start_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    while let Some(line) = read_line(reader)? {
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

/// Read header lines up to and including the blank separator line.
pub(crate) fn read_headers<R: BufRead>(reader: &mut R) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    loop {
        let line = read_line(reader)?.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "stream ended inside header block",
            ))
        })?;
        if line.is_empty() {
            return Ok(headers);
        }
        headers.parse_line(&line)?;
    }
}

/// Read the body announced by `Content-Length`, if any.
pub(crate) fn read_body<R: BufRead>(reader: &mut R, headers: &HeaderMap) -> Result<Option<Bytes>> {
    let Some(value) = headers.get(RtspHeader::ContentLength) else {
        return Ok(None);
    };
    let length: usize = value
        .parse()
        .map_err(|_| Error::parse(ParseErrorKind::InvalidContentLength))?;
    if length > MAX_BODY_SIZE {
        return Err(Error::parse(ParseErrorKind::BodyTooLarge));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::parse(ParseErrorKind::IncompleteBody),
        _ => Error::Io(e),
    })?;
    Ok(Some(Bytes::from(body)))
}

/// Write start line, headers, blank line and body in one buffered write.
pub(crate) fn write_message<W: Write>(
    writer: &mut W,
    start_line: &str,
    headers: &HeaderMap,
    body: Option<&Bytes>,
) -> Result<()> {
    writer.write_all(&encode_message(start_line, headers, body))?;
    writer.flush()?;
    Ok(())
}

pub(crate) fn encode_message(
    start_line: &str,
    headers: &HeaderMap,
    body: Option<&Bytes>,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(256 + body.map_or(0, |b| b.len()));
    out.extend_from_slice(start_line.as_bytes());
    out.extend_from_slice(b"\r\n");
    for (header, value) in headers.iter() {
        out.extend_from_slice(header.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    if let Some(body) = body {
        out.extend_from_slice(body);
    }
    out
}

/// Store `body` and keep `Content-Length` in sync with it.
pub(crate) fn set_body(headers: &mut HeaderMap, slot: &mut Option<Bytes>, body: Bytes) {
    headers.set(RtspHeader::ContentLength, body.len().to_string());
    *slot = Some(body);
}

pub(crate) fn clear_body(headers: &mut HeaderMap, slot: &mut Option<Bytes>) {
    headers.remove(RtspHeader::ContentLength);
    *slot = None;
}
