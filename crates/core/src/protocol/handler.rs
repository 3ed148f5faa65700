use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Component, Path};
use std::sync::Arc;

use super::header::RtspHeader;
use super::method::RtspMethod;
use super::request::RtspRequest;
use super::response::RtspResponse;
use super::sdp;
use super::status::RtspStatus;
use crate::error::{Error, HandlerError};
use crate::media::FrameSource;
use crate::media::mjpeg::MjpegReader;
use crate::media::rtp::PayloadType;
use crate::server::ServerConfig;
use crate::session::{SessionRegistry, TransportHeader, parse_session_id};
use crate::transport::sender::RtpSender;

/// Path of the stream served from the embedded sample.
pub const SAMPLE_PATH: &str = "/sample.mjpeg";

/// One link of the server's handler chain.
///
/// Handlers run in registration order on the same response. Returning an
/// error stops the chain; the error decides the response status.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&RtspRequest, &mut RtspResponse) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        self(request, response)
    }
}

type MethodFn = fn(&SessionHandler, &RtspRequest, &mut RtspResponse) -> Result<(), HandlerError>;

/// Serves `.mjpeg` streams, one [`RtpSender`] per RTSP session.
///
/// Requests are dispatched through a table keyed by method; anything not
/// in the table is answered with `501 Not Implemented`.
pub struct SessionHandler {
    sessions: SessionRegistry,
    config: Arc<ServerConfig>,
    methods: BTreeMap<RtspMethod, MethodFn>,
}

impl SessionHandler {
    pub fn new(sessions: SessionRegistry, config: Arc<ServerConfig>) -> Self {
        let mut methods: BTreeMap<RtspMethod, MethodFn> = BTreeMap::new();
        methods.insert(RtspMethod::Options, Self::options);
        methods.insert(RtspMethod::Describe, Self::describe);
        methods.insert(RtspMethod::Setup, Self::setup);
        methods.insert(RtspMethod::Play, Self::play);
        methods.insert(RtspMethod::Pause, Self::pause);
        methods.insert(RtspMethod::Teardown, Self::teardown);
        methods.insert(RtspMethod::GetParameter, Self::get_parameter);

        Self {
            sessions,
            config,
            methods,
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Methods in the dispatch table, as advertised by OPTIONS.
    pub fn supported_methods(&self) -> impl Iterator<Item = RtspMethod> + '_ {
        self.methods.keys().copied()
    }

    fn options(&self, _request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        let public: Vec<&str> = self.supported_methods().map(RtspMethod::as_str).collect();
        response.headers.set(RtspHeader::Public, public.join(", "));
        Ok(())
    }

    fn describe(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        let mut source = self.open_source(&request.path)?;
        source.close();

        let addr = request
            .remote_addr
            .map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |a| a.ip());
        let name = request.path.trim_start_matches('/');

        response.headers.set(RtspHeader::ContentType, "application/sdp");
        response.set_body(sdp::generate_sdp(name, addr, PayloadType::Jpeg));
        Ok(())
    }

    fn setup(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        if request.session().is_some() {
            return Err(HandlerError::status(
                RtspStatus::MethodNotValidInThisState,
                "session reconfiguration is not supported",
            ));
        }

        let transport_value = request.header(RtspHeader::Transport).ok_or_else(|| {
            HandlerError::status(RtspStatus::BadRequest, "transport header required")
        })?;
        let transport = TransportHeader::parse(transport_value)
            .map_err(|e| HandlerError::status(RtspStatus::UnsupportedTransport, e.to_string()))?;

        let peer = request.remote_addr.ok_or_else(|| {
            HandlerError::status(RtspStatus::BadRequest, "request has no remote address")
        })?;
        let target = SocketAddr::new(peer.ip(), transport.client_rtp_port);

        let source = self.open_source(&request.path)?;
        let sender = Arc::new(RtpSender::new(target, source, self.config.sender)?);
        let id = self.sessions.register(sender.clone());

        let sessions = self.sessions.clone();
        sender.service().add_listener(move |state| {
            if sessions.remove(id).is_some() {
                tracing::info!(session_id = id, %state, "session ended with its stream");
            }
        });

        if let Err(e) = sender.start() {
            self.sessions.remove(id);
            sender.stop();
            return Err(e.into());
        }

        tracing::info!(
            session_id = id,
            path = %request.path,
            client_rtp = %target,
            ssrc = sender.ssrc(),
            "session created via SETUP"
        );

        response.headers.set(RtspHeader::Session, id.to_string());
        response.headers.set(RtspHeader::Transport, transport_value);
        Ok(())
    }

    fn play(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        let (id, sender) = self.session(request)?;
        sender.set_playing(true);
        tracing::info!(session_id = id, "session started playing");
        response.headers.set(RtspHeader::Session, id.to_string());
        Ok(())
    }

    fn pause(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        let (id, sender) = self.session(request)?;
        sender.set_playing(false);
        tracing::info!(session_id = id, "session paused");
        response.headers.set(RtspHeader::Session, id.to_string());
        Ok(())
    }

    fn teardown(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        let (id, _) = self.session(request)?;
        if let Some(sender) = self.sessions.remove(id) {
            sender.stop();
        }
        tracing::info!(session_id = id, "session terminated via TEARDOWN");
        response.headers.set(RtspHeader::Session, id.to_string());
        Ok(())
    }

    /// Keepalive (RFC 2326 §10.8). Parameters are not supported.
    fn get_parameter(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        tracing::trace!(path = %request.path, "GET_PARAMETER keepalive");
        if let Some(id) = request.session().and_then(parse_session_id)
            && self.sessions.contains(id)
        {
            response.headers.set(RtspHeader::Session, id.to_string());
        }
        Ok(())
    }

    /// The session named by the request's `Session` header.
    fn session(&self, request: &RtspRequest) -> Result<(u64, Arc<RtpSender>), HandlerError> {
        let header = request.session().ok_or_else(|| {
            HandlerError::status(RtspStatus::BadRequest, "session header required")
        })?;
        let id = parse_session_id(header)
            .ok_or_else(|| HandlerError::status(RtspStatus::BadRequest, "invalid session id"))?;
        let sender = self
            .sessions
            .get(id)
            .ok_or_else(|| HandlerError::status(RtspStatus::SessionNotFound, "session not found"))?;
        Ok((id, sender))
    }

    /// Open the frame source a request path names.
    fn open_source(&self, path: &str) -> Result<Box<dyn FrameSource>, HandlerError> {
        if !path.ends_with(".mjpeg") {
            return Err(HandlerError::status(
                RtspStatus::UnsupportedMediaType,
                "only .mjpeg streams are supported",
            ));
        }
        if path == SAMPLE_PATH {
            return Ok(Box::new(MjpegReader::sample()));
        }

        let not_found = || HandlerError::status(RtspStatus::NotFound, "stream not found");
        let root = self.config.media_root.as_deref().ok_or_else(not_found)?;
        let relative = Path::new(path.trim_start_matches('/'));
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            tracing::warn!(path, "rejected path outside media root");
            return Err(not_found());
        }

        match MjpegReader::open(root.join(relative)) {
            Ok(reader) => Ok(Box::new(reader)),
            Err(Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Handler for SessionHandler {
    fn handle(&self, request: &RtspRequest, response: &mut RtspResponse) -> Result<(), HandlerError> {
        match self.methods.get(&request.method) {
            Some(method) => method(self, request, response),
            None => {
                tracing::warn!(method = %request.method, "unsupported RTSP method");
                Err(HandlerError::status(
                    RtspStatus::NotImplemented,
                    format!("{} is not implemented", request.method),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sender::SenderConfig;
    use std::net::UdpSocket;

    fn handler() -> SessionHandler {
        SessionHandler::new(SessionRegistry::new(), Arc::new(ServerConfig::default()))
    }

    fn request(method: RtspMethod, path: &str) -> RtspRequest {
        let mut req = RtspRequest::new(method, path);
        req.remote_addr = Some("127.0.0.1:40000".parse().unwrap());
        req
    }

    fn run(handler: &SessionHandler, req: &RtspRequest) -> Result<RtspResponse, HandlerError> {
        let mut response = RtspResponse::ok();
        handler.handle(req, &mut response).map(|_| response)
    }

    fn status_of(result: Result<RtspResponse, HandlerError>) -> RtspStatus {
        match result {
            Ok(response) => response.status,
            Err(e) => e.response_status(),
        }
    }

    fn setup(handler: &SessionHandler, port: u16) -> u64 {
        let mut req = request(RtspMethod::Setup, SAMPLE_PATH);
        req.headers
            .set(RtspHeader::Transport, format!("RTP/AVP/UDP;client_port={}", port));
        let response = run(handler, &req).unwrap();
        response.session().unwrap().parse().unwrap()
    }

    #[test]
    fn options_lists_dispatch_table() {
        let response = run(&handler(), &request(RtspMethod::Options, "*")).unwrap();
        let public = response.header(RtspHeader::Public).unwrap();
        for method in ["OPTIONS", "DESCRIBE", "SETUP", "PLAY", "PAUSE", "TEARDOWN", "GET_PARAMETER"] {
            assert!(public.contains(method), "{}", public);
        }
        assert!(!public.contains("RECORD"));
    }

    #[test]
    fn describe_sample() {
        let response = run(&handler(), &request(RtspMethod::Describe, SAMPLE_PATH)).unwrap();
        assert_eq!(response.header(RtspHeader::ContentType), Some("application/sdp"));
        let sdp = response.body_text().unwrap();
        assert!(sdp.contains("IN IP4 127.0.0.1\r\n"));
        assert!(sdp.contains("s=sample.mjpeg\r\n"));
        assert!(sdp.contains("m=video 1024/2 RTP/AVP 26\r\n"));
    }

    #[test]
    fn describe_unknown_path() {
        let h = handler();
        assert_eq!(
            status_of(run(&h, &request(RtspMethod::Describe, "/missing.mjpeg"))),
            RtspStatus::NotFound
        );
        assert_eq!(
            status_of(run(&h, &request(RtspMethod::Describe, "/movie.mp4"))),
            RtspStatus::UnsupportedMediaType
        );
    }

    #[test]
    fn setup_validation() {
        let h = handler();

        let req = request(RtspMethod::Setup, SAMPLE_PATH);
        assert_eq!(status_of(run(&h, &req)), RtspStatus::BadRequest);

        let mut req = request(RtspMethod::Setup, SAMPLE_PATH);
        req.headers.set(RtspHeader::Transport, "RTP/AVP/TCP;interleaved=0-1");
        assert_eq!(status_of(run(&h, &req)), RtspStatus::UnsupportedTransport);

        let mut req = request(RtspMethod::Setup, SAMPLE_PATH);
        req.headers.set(RtspHeader::Transport, "RTP/AVP;client_port=70000");
        assert_eq!(status_of(run(&h, &req)), RtspStatus::UnsupportedTransport);

        let mut req = request(RtspMethod::Setup, SAMPLE_PATH);
        req.headers.set(RtspHeader::Transport, "RTP/AVP;client_port=5000");
        req.headers.set(RtspHeader::Session, "1");
        assert_eq!(status_of(run(&h, &req)), RtspStatus::MethodNotValidInThisState);

        let mut req = request(RtspMethod::Setup, "/clip.avi");
        req.headers.set(RtspHeader::Transport, "RTP/AVP;client_port=5000");
        assert_eq!(status_of(run(&h, &req)), RtspStatus::UnsupportedMediaType);

        assert!(h.sessions().is_empty());
    }

    #[test]
    fn setup_play_pause_teardown() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let h = handler();
        let id = setup(&h, socket.local_addr().unwrap().port());
        let sender = h.sessions().get(id).unwrap();
        assert!(!sender.is_playing());

        let mut play = request(RtspMethod::Play, SAMPLE_PATH);
        play.headers.set(RtspHeader::Session, id.to_string());
        let response = run(&h, &play).unwrap();
        assert_eq!(response.session(), Some(id.to_string().as_str()));
        assert!(sender.is_playing());

        let mut pause = request(RtspMethod::Pause, SAMPLE_PATH);
        pause.headers.set(RtspHeader::Session, format!("{};timeout=60", id));
        run(&h, &pause).unwrap();
        assert!(!sender.is_playing());

        let mut teardown = request(RtspMethod::Teardown, SAMPLE_PATH);
        teardown.headers.set(RtspHeader::Session, id.to_string());
        run(&h, &teardown).unwrap();
        assert!(h.sessions().is_empty());
        assert_eq!(status_of(run(&h, &teardown)), RtspStatus::SessionNotFound);
    }

    #[test]
    fn session_header_errors() {
        let h = handler();
        let req = request(RtspMethod::Play, SAMPLE_PATH);
        assert_eq!(status_of(run(&h, &req)), RtspStatus::BadRequest);

        let mut req = request(RtspMethod::Play, SAMPLE_PATH);
        req.headers.set(RtspHeader::Session, "not-a-number");
        assert_eq!(status_of(run(&h, &req)), RtspStatus::BadRequest);

        let mut req = request(RtspMethod::Pause, SAMPLE_PATH);
        req.headers.set(RtspHeader::Session, "7");
        assert_eq!(status_of(run(&h, &req)), RtspStatus::SessionNotFound);
    }

    #[test]
    fn unsupported_method() {
        assert_eq!(
            status_of(run(&handler(), &request(RtspMethod::Record, SAMPLE_PATH))),
            RtspStatus::NotImplemented
        );
    }

    #[test]
    fn rejects_traversal() {
        let config = ServerConfig {
            media_root: Some(std::env::temp_dir()),
            sender: SenderConfig::default(),
            ..ServerConfig::default()
        };
        let h = SessionHandler::new(SessionRegistry::new(), Arc::new(config));
        assert_eq!(
            status_of(run(&h, &request(RtspMethod::Describe, "/../etc/x.mjpeg"))),
            RtspStatus::NotFound
        );
    }

    #[test]
    fn sender_termination_deregisters() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let h = handler();
        let id = setup(&h, socket.local_addr().unwrap().port());
        let sender = h.sessions().get(id).unwrap();

        sender.stop();
        sender
            .service()
            .await_terminated(Some(std::time::Duration::from_secs(2)));
        // The listener runs on the sender thread right after termination.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while h.sessions().contains(id) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(!h.sessions().contains(id));
    }

    #[test]
    fn closure_handlers() {
        let h = |req: &RtspRequest, _: &mut RtspResponse| -> Result<(), HandlerError> {
            if req.header(RtspHeader::Authorization).is_none() {
                return Err(HandlerError::status(RtspStatus::Unauthorized, "denied"));
            }
            Ok(())
        };
        let req = request(RtspMethod::Options, "*");
        let mut response = RtspResponse::ok();
        assert_eq!(
            h.handle(&req, &mut response).unwrap_err().response_status(),
            RtspStatus::Unauthorized
        );
    }
}
