//! Error types for the streaming library.

use std::fmt;

use crate::protocol::{RtspResponse, RtspStatus};

/// Errors that can occur anywhere in the streaming stack.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Media**: [`MalformedPacket`](Self::MalformedPacket),
///   [`InvalidFecGroup`](Self::InvalidFecGroup),
///   [`MalformedFrame`](Self::MalformedFrame).
/// - **Control**: [`Parse`](Self::Parse) for malformed RTSP messages,
///   [`Protocol`](Self::Protocol) for rejected client requests.
/// - **Transport**: [`Io`](Self::Io) for socket failures.
/// - **Services**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`NotStarted`](Self::NotStarted), [`ServiceStopped`](Self::ServiceStopped).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A datagram could not be decoded as an RTP or FEC packet.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// A FEC group did not hold between 2 and 16 packets, or carried no payload.
    #[error("invalid FEC group: {0}")]
    InvalidFecGroup(String),

    /// A frame source produced bytes that do not form a frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Failed to parse an RTSP message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The peer answered a request with a mismatched CSeq or a non-2xx status.
    #[error(transparent)]
    Protocol(Box<ProtocolError>),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A service was started twice.
    #[error("service already running")]
    AlreadyRunning,

    /// A service was used before it was started.
    #[error("service not started")]
    NotStarted,

    /// A blocking call was interrupted because its service is shutting down.
    #[error("service stopped")]
    ServiceStopped,
}

impl Error {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Error::Parse { kind }
    }
}

/// Specific kind of RTSP parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI RTSP/1.x` format.
    InvalidRequestLine,
    /// Request line named a method outside the RTSP method set.
    InvalidMethod,
    /// Response line did not have the expected `RTSP/1.x Code` format.
    InvalidStatusLine,
    /// Response carried a status code outside the RTSP status table.
    UnknownStatus,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` was not a non-negative integer.
    InvalidContentLength,
    /// The stream ended before `Content-Length` body bytes were read.
    IncompleteBody,
    /// A start or header line exceeded the line length limit.
    LineTooLong,
    /// `Content-Length` announced a body above the size limit.
    BodyTooLarge,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidMethod => write!(f, "invalid method"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::UnknownStatus => write!(f, "unknown status code"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::IncompleteBody => write!(f, "incomplete body"),
            Self::LineTooLong => write!(f, "line too long"),
            Self::BodyTooLarge => write!(f, "body too large"),
        }
    }
}

/// A response the RTSP client refused to accept.
///
/// Carries the full response so callers can inspect the status and body,
/// e.g. to treat `454 Session Not Found` on TEARDOWN as already complete.
#[derive(Debug)]
pub struct ProtocolError {
    message: String,
    response: RtspResponse,
}

impl ProtocolError {
    pub fn new(message: impl Into<String>, response: RtspResponse) -> Self {
        Self {
            message: message.into(),
            response,
        }
    }

    pub fn status(&self) -> RtspStatus {
        self.response.status
    }

    pub fn response(&self) -> &RtspResponse {
        &self.response
    }

    pub fn into_response(self) -> RtspResponse {
        self.response
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.response.status;
        write!(f, "{} ({} {}", self.message, status.code(), status.reason_phrase())?;
        if let Some(body) = self.response.body.as_ref() {
            if let Ok(text) = std::str::from_utf8(body) {
                write!(f, " - {}", text)?;
            }
        }
        write!(f, ")")
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(Box::new(err))
    }
}

/// Failure raised by a server request handler.
///
/// [`Status`](Self::Status) short-circuits the handler chain and becomes the
/// response status with `message` as the body. Anything else is answered
/// with `500 Internal Server Error`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{message}")]
    Status { status: RtspStatus, message: String },

    #[error(transparent)]
    Internal(#[from] Error),
}

impl HandlerError {
    pub fn status(status: RtspStatus, message: impl Into<String>) -> Self {
        HandlerError::Status {
            status,
            message: message.into(),
        }
    }

    /// The status this error is answered with.
    pub fn response_status(&self) -> RtspStatus {
        match self {
            HandlerError::Status { status, .. } => *status,
            HandlerError::Internal(_) => RtspStatus::InternalServerError,
        }
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
