use std::io::{BufRead, Write};

use bytes::Bytes;

use super::header::{HeaderMap, RtspHeader};
use super::message;
use super::status::RtspStatus;
use crate::error::{Error, ParseErrorKind, Result};

/// Default server identification string (RFC 2326 §12.36).
pub const SERVER_AGENT: &str = concat!("rtsp-fec/", env!("CARGO_PKG_VERSION"));

/// An RTSP response (RFC 2326 §7).
///
/// ```text
/// RTSP/1.0 200 OK\r\n
/// CSeq: 1\r\n
/// Content-Type: application/sdp\r\n
/// Content-Length: 142\r\n
/// \r\n
/// v=0\r\n...
/// ```
///
/// `Content-Length` follows the body: [`set_body`](Self::set_body) adds
/// it, [`clear_body`](Self::clear_body) removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status: RtspStatus,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RtspResponse {
    pub fn new(status: RtspStatus) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// 200 OK.
    pub fn ok() -> Self {
        Self::new(RtspStatus::Ok)
    }

    pub fn header(&self, header: RtspHeader) -> Option<&str> {
        self.headers.get(header)
    }

    pub fn cseq(&self) -> Option<&str> {
        self.headers.get(RtspHeader::CSeq)
    }

    pub fn session(&self) -> Option<&str> {
        self.headers.get(RtspHeader::Session)
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        message::set_body(&mut self.headers, &mut self.body, body.into());
    }

    pub fn clear_body(&mut self) {
        message::clear_body(&mut self.headers, &mut self.body);
    }

    /// The body as text, if present and valid UTF-8.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        message::write_message(writer, &self.status_line(), &self.headers, self.body.as_ref())
    }

    fn status_line(&self) -> String {
        format!(
            "RTSP/1.0 {} {}",
            self.status.code(),
            self.status.reason_phrase()
        )
    }

    /// Read one response from `reader`.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly before a status line.
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Option<Self>> {
        let Some(line) = message::read_start_line(reader)? else {
            return Ok(None);
        };
        let status = parse_status_line(&line)?;

        let headers = message::read_headers(reader)?;
        let body = message::read_body(reader, &headers)?;

        Ok(Some(Self {
            status,
            headers,
            body,
        }))
    }

    /// Serialize to the wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        message::encode_message(&self.status_line(), &self.headers, self.body.as_ref())
    }
}

/// `RTSP/1.x NNN [reason]`; the reason phrase is not checked.
fn parse_status_line(line: &str) -> Result<RtspStatus> {
    let mut parts = line.splitn(3, ' ');
    let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
        return Err(Error::parse(ParseErrorKind::InvalidStatusLine));
    };

    if !matches!(version, "RTSP/1.0" | "RTSP/1.1")
        || code.len() != 3
        || !code.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(Error::parse(ParseErrorKind::InvalidStatusLine));
    }

    code.parse::<u16>()
        .ok()
        .and_then(RtspStatus::from_code)
        .ok_or(Error::parse(ParseErrorKind::UnknownStatus))
}
