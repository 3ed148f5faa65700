//! Client-side playback of one RTSP stream.
//!
//! A [`Player`] owns the control connection, the RTP receiver and a
//! delivery thread:
//!
//! ```text
//! open:  SETUP (client_port = receiver port) -> Session id
//! play:  gate open,   PLAY
//! pause: gate closed, PAUSE
//! stop:  TEARDOWN, receiver stopped, connection closed
//! ```
//!
//! The delivery thread pulls packets from the receiver in presentation
//! order and hands JPEG payloads to the sink while the gate is open. If
//! the receiver stops on its own, the player tears the session down.

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use crate::client::RtspClient;
use crate::error::{Error, ProtocolError, Result};
use crate::media::rtp::PayloadType;
use crate::protocol::{RtspHeader, RtspMethod, RtspRequest, RtspStatus};
use crate::service::{ServiceHandle, ServiceState};
use crate::session::TransportHeader;
use crate::transport::receiver::{ReceiverConfig, ReceiverStats, RtpReceiver};

/// How long [`Player::stop`] waits for the delivery thread.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Shared {
    client: RtspClient,
    path: String,
    session: String,
    playing: Mutex<bool>,
    changed: Condvar,
    receiver_done: AtomicBool,
    torn_down: AtomicBool,
}

impl Shared {
    fn request(&self, method: RtspMethod) -> Result<()> {
        let mut request = RtspRequest::new(method, self.path.as_str());
        request
            .headers
            .set(RtspHeader::Session, self.session.as_str());
        self.client.fetch(request)?;
        Ok(())
    }

    fn set_playing(&self, playing: bool) {
        *self.playing.lock() = playing;
        self.changed.notify_all();
    }

    fn wake(&self) {
        let _playing = self.playing.lock();
        self.changed.notify_all();
    }

    /// Block until the gate opens. Returns `false` if the player or its
    /// receiver stopped first.
    fn await_playing(&self, service: &ServiceHandle) -> bool {
        let mut playing = self.playing.lock();
        while !*playing && service.is_running() && !self.receiver_done.load(Ordering::Acquire) {
            self.changed.wait(&mut playing);
        }
        *playing && service.is_running()
    }

    /// Send TEARDOWN once and close the control connection.
    fn teardown(&self) -> Result<()> {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = match self.request(RtspMethod::Teardown) {
            Err(Error::Protocol(e)) if e.status() == RtspStatus::SessionNotFound => {
                tracing::debug!(session = %self.session, "session already gone");
                Ok(())
            }
            other => other,
        };
        self.client.close();

        tracing::info!(session = %self.session, "session torn down");
        result
    }
}

/// Playback of one stream from an RTSP server.
pub struct Player {
    shared: Arc<Shared>,
    receiver: Arc<RtpReceiver>,
    service: ServiceHandle,
}

impl Player {
    /// Set up `path` on `server` with the default receiver configuration.
    pub fn open<F>(server: impl ToSocketAddrs, path: &str, sink: F) -> Result<Self>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        Self::open_with_config(server, path, ReceiverConfig::default(), sink)
    }

    /// Connect, bind a receiver, send SETUP and start receiving. The
    /// stream stays paused until [`play`](Self::play).
    pub fn open_with_config<F>(
        server: impl ToSocketAddrs,
        path: &str,
        config: ReceiverConfig,
        sink: F,
    ) -> Result<Self>
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        let client = RtspClient::connect(server)?;
        let receiver = match RtpReceiver::bind(SocketAddr::new(client.local_addr().ip(), 0), config) {
            Ok(receiver) => Arc::new(receiver),
            Err(e) => {
                client.close();
                return Err(e);
            }
        };

        let mut setup = RtspRequest::new(RtspMethod::Setup, path);
        setup.headers.set(
            RtspHeader::Transport,
            TransportHeader::udp(receiver.local_addr().port()).to_string(),
        );

        let session = match client.fetch(setup).and_then(|response| {
            match response.session() {
                Some(session) => Ok(session.split(';').next().unwrap_or(session).trim().to_string()),
                None => Err(ProtocolError::new("missing session header", response).into()),
            }
        }) {
            Ok(session) => session,
            Err(e) => {
                client.close();
                return Err(e);
            }
        };

        tracing::info!(%session, path, rtp_port = receiver.local_addr().port(), "session set up");

        let shared = Arc::new(Shared {
            client,
            path: path.to_string(),
            session,
            playing: Mutex::new(false),
            changed: Condvar::new(),
            receiver_done: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        });

        let listener_shared = shared.clone();
        receiver.service().add_listener(move |state| {
            if let ServiceState::Failed(reason) = state {
                tracing::error!(reason = %reason, "receiver failed");
            }
            listener_shared.receiver_done.store(true, Ordering::Release);
            listener_shared.wake();
        });

        let service = ServiceHandle::new(format!("player-{}", shared.session));
        let started = receiver.start().and_then(|_| {
            let body_service = service.clone();
            let body_shared = shared.clone();
            let body_receiver = receiver.clone();
            service.spawn(move || deliver(&body_service, &body_shared, &body_receiver, sink))
        });
        if let Err(e) = started {
            receiver.stop();
            let _ = shared.teardown();
            return Err(e);
        }

        Ok(Self {
            shared,
            receiver,
            service,
        })
    }

    /// The session id the server assigned.
    pub fn session_id(&self) -> &str {
        &self.shared.session
    }

    pub fn service(&self) -> &ServiceHandle {
        &self.service
    }

    /// Open the local gate and send PLAY.
    pub fn play(&self) -> Result<()> {
        self.shared.set_playing(true);
        self.shared.request(RtspMethod::Play)
    }

    /// Close the local gate and send PAUSE.
    pub fn pause(&self) -> Result<()> {
        self.shared.set_playing(false);
        self.shared.request(RtspMethod::Pause)
    }

    pub fn is_playing(&self) -> bool {
        *self.shared.playing.lock()
    }

    /// Tear the session down and stop receiving.
    pub fn stop(&self) -> Result<()> {
        self.service.request_stop();
        self.shared.wake();
        let result = self.shared.teardown();
        self.receiver.stop();
        self.service.await_terminated(Some(STOP_TIMEOUT));
        result
    }

    pub fn stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    /// Whether the receiver is currently refilling its jitter buffer.
    pub fn is_buffering(&self) -> bool {
        self.receiver.is_buffering()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::debug!(error = %e, "teardown on drop failed");
        }
    }
}

/// Delivery thread body.
fn deliver<F>(service: &ServiceHandle, shared: &Shared, receiver: &RtpReceiver, mut sink: F) -> Result<()>
where
    F: FnMut(Bytes),
{
    let mut result = Ok(());
    while service.is_running() {
        let packet = match receiver.next() {
            Ok(packet) => packet,
            Err(Error::ServiceStopped) => break,
            Err(e) => {
                result = Err(e);
                break;
            }
        };

        if packet.payload_type() != PayloadType::Jpeg {
            continue;
        }
        if !shared.await_playing(service) {
            break;
        }
        sink(packet.payload);
    }

    // The receiver ended on its own; nobody else will tear down.
    if service.is_running() {
        tracing::info!(session = %shared.session, "receiver stopped, ending session");
        receiver.stop();
        if let Err(e) = shared.teardown() {
            tracing::warn!(error = %e, "teardown failed");
        }
    }
    result
}
