//! Blocking RTSP client for one control connection.
//!
//! Requests are strictly sequential: the connection lock is held from
//! writing a request until its response has been read, so concurrent
//! callers never interleave on the wire.
//!
//! ```text
//! client                                server
//!   | SETUP rtsp://h:p/x   CSeq: 1  -->   |
//!   | <--  RTSP/1.0 200 OK CSeq: 1        |
//!   | PLAY  rtsp://h:p/x   CSeq: 2  -->   |
//! ```

use std::io::{self, BufReader};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use parking_lot::Mutex;

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::{RtspHeader, RtspMethod, RtspRequest, RtspResponse, SERVER_AGENT};

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    cseq: u64,
}

pub struct RtspClient {
    connection: Mutex<Connection>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl RtspClient {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;

        tracing::debug!(%peer_addr, %local_addr, "RTSP control connection open");

        Ok(Self {
            connection: Mutex::new(Connection {
                reader: BufReader::new(stream.try_clone()?),
                writer: stream,
                cseq: 0,
            }),
            peer_addr,
            local_addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send `request` and wait for its response.
    ///
    /// A path that is not already an `rtsp://` URL is made absolute against
    /// the server address. Fails with [`Error::Protocol`] if the response
    /// carries a different CSeq or a status outside 2xx.
    pub fn fetch(&self, mut request: RtspRequest) -> Result<RtspResponse> {
        if !request.path.starts_with("rtsp://") {
            let path = request.path.trim_start_matches('/');
            request.path = format!("rtsp://{}/{}", self.peer_addr, path);
        }
        request
            .headers
            .set_if_absent(RtspHeader::UserAgent, SERVER_AGENT);

        let mut conn = self.connection.lock();
        conn.cseq += 1;
        let cseq = conn.cseq.to_string();
        request.headers.set(RtspHeader::CSeq, cseq.as_str());

        tracing::debug!(method = %request.method, url = %request.path, %cseq, "sending request");
        request.write_to(&mut conn.writer)?;

        let response = RtspResponse::read_from(&mut conn.reader)?.ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before response",
            ))
        })?;
        drop(conn);

        tracing::debug!(status = response.status.code(), %cseq, "received response");

        if response.cseq() != Some(cseq.as_str()) {
            return Err(ProtocolError::new("cseq header does not match", response).into());
        }
        if !response.status.is_success() {
            return Err(ProtocolError::new("non 2xx status code", response).into());
        }
        Ok(response)
    }

    /// Send a request with no extra headers.
    pub fn request(&self, method: RtspMethod, path: &str) -> Result<RtspResponse> {
        self.fetch(RtspRequest::new(method, path))
    }

    /// Shut the connection down in both directions.
    pub fn close(&self) {
        let conn = self.connection.lock();
        if let Err(e) = conn.writer.shutdown(Shutdown::Both)
            && e.kind() != io::ErrorKind::NotConnected
        {
            tracing::debug!(peer_addr = %self.peer_addr, error = %e, "error closing control connection");
        }
    }
}

impl std::fmt::Debug for RtspClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtspClient")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
