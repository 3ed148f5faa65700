use std::io::{BufRead, Write};
use std::net::SocketAddr;

use bytes::Bytes;

use super::header::{HeaderMap, RtspHeader};
use super::message;
use super::method::RtspMethod;
use crate::error::{Error, ParseErrorKind, Result};

/// An RTSP request (RFC 2326 §6).
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// On the server side `path` holds only the path component of the
/// Request-URI and `remote_addr` the peer that sent it. On the client side
/// `path` is whatever should go on the wire, usually an absolute
/// `rtsp://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: RtspMethod,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub remote_addr: Option<SocketAddr>,
}

impl RtspRequest {
    pub fn new(method: RtspMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            remote_addr: None,
        }
    }

    /// Read one request from `reader`.
    ///
    /// Returns `Ok(None)` if the stream ends cleanly before a request line.
    pub fn read_from<R: BufRead>(
        reader: &mut R,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Option<Self>> {
        let Some(line) = message::read_start_line(reader)? else {
            return Ok(None);
        };
        let (method, path) = parse_request_line(&line)?;

        let headers = message::read_headers(reader)?;
        let body = message::read_body(reader, &headers)?;

        Ok(Some(Self {
            method,
            path,
            headers,
            body,
            remote_addr,
        }))
    }

    /// Parse a complete request held in memory.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        let mut reader = raw;
        Self::read_from(&mut reader, None)?.ok_or(Error::parse(ParseErrorKind::EmptyRequest))
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let start_line = format!("{} {} RTSP/1.0", self.method, self.path);
        message::write_message(writer, &start_line, &self.headers, self.body.as_ref())
    }

    pub fn header(&self, header: RtspHeader) -> Option<&str> {
        self.headers.get(header)
    }

    /// The CSeq header, which pairs a response with its request
    /// (RFC 2326 §12.17).
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
}

/// Split `METHOD URI RTSP/1.x` and reduce the URI to its path.
fn parse_request_line(line: &str) -> Result<(RtspMethod, String)> {
    let mut parts = line.split(' ');
    let (Some(method), Some(uri), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::parse(ParseErrorKind::InvalidRequestLine));
    };

    if method.is_empty() || uri.is_empty() || !matches!(version, "RTSP/1.0" | "RTSP/1.1") {
        return Err(Error::parse(ParseErrorKind::InvalidRequestLine));
    }

    Ok((method.parse()?, request_path(uri)))
}

/// `rtsp://host:554/a/b` → `/a/b`; relative paths gain a leading `/`.
fn request_path(uri: &str) -> String {
    match url::Url::parse(uri) {
        Ok(url) if url.path().is_empty() => "/".to_string(),
        Ok(url) => url.path().to_string(),
        Err(_) if uri.starts_with('/') => uri.to_string(),
        Err(_) => format!("/{}", uri),
    }
}
