use std::collections::HashMap;
use std::io::{BufReader, ErrorKind};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{Error, HandlerError, Result};
use crate::protocol::{Handler, RtspHeader, RtspRequest, RtspResponse, RtspStatus};
use crate::service::ServiceHandle;

/// How often the accept loop checks for shutdown while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// RTSP `Date` header format (RFC 2326 §12.18, RFC 1123 dates).
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// The ordered handler chain shared by every connection.
pub(crate) type HandlerChain = Arc<[Arc<dyn Handler>]>;

/// Open control connections, so shutdown can close them.
#[derive(Clone, Default)]
pub(crate) struct ConnectionSet {
    next_id: Arc<AtomicU64>,
    streams: Arc<Mutex<HashMap<u64, (TcpStream, ServiceHandle)>>>,
}

impl ConnectionSet {
    fn insert(&self, stream: TcpStream, service: ServiceHandle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.streams.lock().insert(id, (stream, service));
        id
    }

    fn remove(&self, id: u64) {
        self.streams.lock().remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.streams.lock().len()
    }

    /// Stop every connection and unblock its pending read.
    pub(crate) fn close_all(&self) {
        let streams: Vec<_> = self.streams.lock().drain().map(|(_, v)| v).collect();
        for (stream, service) in streams {
            service.request_stop();
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

/// Non-blocking TCP accept loop.
///
/// Checks the service state between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub(crate) fn accept_loop(
    listener: TcpListener,
    service: &ServiceHandle,
    handlers: HandlerChain,
    server_agent: Arc<str>,
    connections: ConnectionSet,
) -> Result<()> {
    listener.set_nonblocking(true)?;

    while service.is_running() {
        match listener.accept() {
            Ok((stream, peer_addr)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    tracing::warn!(%peer_addr, error = %e, "dropping connection");
                    continue;
                }
                if let Err(e) =
                    Connection::spawn(stream, peer_addr, &handlers, &server_agent, &connections)
                {
                    tracing::warn!(%peer_addr, error = %e, "failed to start connection");
                }
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                if service.is_running() {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }

    tracing::debug!("accept loop exited");
    Ok(())
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer_addr: SocketAddr,
    handlers: HandlerChain,
    server_agent: Arc<str>,
}

impl Connection {
    /// Register the connection and start its request loop on a new thread.
    fn spawn(
        stream: TcpStream,
        peer_addr: SocketAddr,
        handlers: &HandlerChain,
        server_agent: &Arc<str>,
        connections: &ConnectionSet,
    ) -> Result<()> {
        let service = ServiceHandle::new(format!("rtsp-conn-{}", peer_addr));
        let mut conn = Connection {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream.try_clone()?,
            peer_addr,
            handlers: handlers.clone(),
            server_agent: server_agent.clone(),
        };

        let id = connections.insert(stream, service.clone());
        let registered = connections.clone();
        service.add_listener(move |_| registered.remove(id));

        tracing::info!(%peer_addr, "client connected");

        let body_service = service.clone();
        if let Err(e) = service.spawn(move || {
            let reason = conn.run(&body_service);
            tracing::info!(peer_addr = %conn.peer_addr, reason, "client disconnected");
            Ok(())
        }) {
            connections.remove(id);
            return Err(e);
        }
        Ok(())
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self, service: &ServiceHandle) -> &'static str {
        while service.is_running() {
            let request = match RtspRequest::read_from(&mut self.reader, Some(self.peer_addr)) {
                Ok(Some(request)) => request,
                Ok(None) => return "connection closed by client",
                Err(Error::Io(e)) => {
                    tracing::debug!(peer = %self.peer_addr, error = %e, "read error");
                    return "read error";
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                    let mut response = RtspResponse::new(RtspStatus::BadRequest);
                    response.set_body(e.to_string());
                    self.finalize(None, &mut response);
                    let _ = response.write_to(&mut self.writer);
                    return "malformed request";
                }
            };

            tracing::debug!(
                peer = %self.peer_addr,
                method = %request.method,
                path = %request.path,
                cseq = request.cseq().unwrap_or("-"),
                "request"
            );

            let mut response = self.dispatch(&request);
            self.finalize(Some(&request), &mut response);

            tracing::debug!(
                peer = %self.peer_addr,
                status = response.status.code(),
                "response"
            );

            if let Err(e) = response.write_to(&mut self.writer) {
                tracing::debug!(peer = %self.peer_addr, error = %e, "write error");
                return "write error";
            }
        }

        "server shutting down"
    }

    /// Run the handler chain; the first error becomes the response.
    fn dispatch(&self, request: &RtspRequest) -> RtspResponse {
        let mut response = RtspResponse::ok();
        for handler in self.handlers.iter() {
            if let Err(e) = handler.handle(request, &mut response) {
                return error_response(&e, self.peer_addr);
            }
        }
        response
    }

    /// Headers present on every response.
    fn finalize(&self, request: Option<&RtspRequest>, response: &mut RtspResponse) {
        if let Some(request) = request {
            response.headers.copy_from(&request.headers, RtspHeader::CSeq);
        }
        response
            .headers
            .set(RtspHeader::Date, chrono::Utc::now().format(DATE_FORMAT).to_string());
        response
            .headers
            .set(RtspHeader::Server, self.server_agent.as_ref());
        response
            .headers
            .set_if_absent(RtspHeader::ContentType, "text/plain");
    }
}

fn error_response(error: &HandlerError, peer_addr: SocketAddr) -> RtspResponse {
    let status = error.response_status();
    match error {
        HandlerError::Status { message, .. } => {
            tracing::warn!(peer = %peer_addr, %status, message = %message, "request rejected");
        }
        HandlerError::Internal(e) => {
            tracing::error!(peer = %peer_addr, error = %e, "handler failed");
        }
    }

    let mut response = RtspResponse::new(status);
    response.set_body(error.to_string());
    response
}
