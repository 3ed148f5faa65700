use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::protocol::handler::SessionHandler;
use crate::protocol::{Handler, SERVER_AGENT};
use crate::service::ServiceHandle;
use crate::session::SessionRegistry;
use crate::transport::sender::SenderConfig;
use crate::transport::tcp::{self, ConnectionSet, HandlerChain};

/// Server-level configuration used by protocol handlers.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory `.mjpeg` request paths resolve under. When `None`, only
    /// the embedded `/sample.mjpeg` stream is served.
    pub media_root: Option<PathBuf>,
    /// Loss simulation and FEC settings for every sender.
    pub sender: SenderConfig,
    /// Value of the `Server` response header.
    pub server_agent: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            media_root: None,
            sender: SenderConfig::default(),
            server_agent: SERVER_AGENT.to_string(),
        }
    }
}

/// High-level RTSP server orchestrator.
///
/// Owns the session registry and the handler chain. Delegates TCP
/// connection handling to [`tcp`] and RTP delivery to one
/// [`RtpSender`](crate::transport::sender::RtpSender) per session.
pub struct Server {
    config: Arc<ServerConfig>,
    sessions: SessionRegistry,
    handlers: Mutex<Vec<Arc<dyn Handler>>>,
    service: ServiceHandle,
    connections: ConnectionSet,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.sender.validate()?;
        if let Some(root) = &config.media_root
            && !root.is_dir()
        {
            return Err(Error::InvalidConfig(format!(
                "media root {} is not a directory",
                root.display()
            )));
        }

        Ok(Self {
            config: Arc::new(config),
            sessions: SessionRegistry::new(),
            handlers: Mutex::new(Vec::new()),
            service: ServiceHandle::new("rtsp-acceptor"),
            connections: ConnectionSet::default(),
            local_addr: Mutex::new(None),
        })
    }

    /// Add a handler that runs before the session handler, e.g. for
    /// authentication. Only effective before [`start`](Self::start).
    pub fn add_handler(&self, handler: impl Handler + 'static) {
        self.handlers.lock().push(Arc::new(handler));
    }

    /// Bind `addr` and start accepting connections. Returns the bound
    /// address, useful with port 0.
    pub fn start(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        if self.service.state() != crate::service::ServiceState::Created {
            return Err(Error::AlreadyRunning);
        }

        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        let mut chain = self.handlers.lock().clone();
        chain.push(Arc::new(SessionHandler::new(
            self.sessions.clone(),
            self.config.clone(),
        )));
        let chain: HandlerChain = chain.into();

        let service = self.service.clone();
        let agent: Arc<str> = Arc::from(self.config.server_agent.as_str());
        let connections = self.connections.clone();
        self.service
            .spawn(move || tcp::accept_loop(listener, &service, chain, agent, connections))?;

        *self.local_addr.lock() = Some(local_addr);
        tracing::info!(addr = %local_addr, "RTSP server listening");
        Ok(local_addr)
    }

    /// Stop accepting, close every control connection and stop every
    /// session's sender.
    pub fn stop(&self) {
        if self.service.request_stop() {
            tracing::info!("server stopping");
        }
        self.connections.close_all();
        let stopped = self.sessions.stop_all();
        if stopped > 0 {
            tracing::info!(stopped, "stopped active sessions");
        }
    }

    pub fn is_running(&self) -> bool {
        self.service.is_running()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn service(&self) -> &ServiceHandle {
        &self.service
    }

    /// Returns the server's configuration.
    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceState;
    use std::time::Duration;

    #[test]
    fn rejects_invalid_config() {
        let config = ServerConfig {
            sender: SenderConfig {
                loss_rate: 2.0,
                fec_group_size: 0,
            },
            ..ServerConfig::default()
        };
        assert!(matches!(Server::new(config), Err(Error::InvalidConfig(_))));

        let config = ServerConfig {
            media_root: Some(PathBuf::from("/definitely/not/a/dir")),
            ..ServerConfig::default()
        };
        assert!(matches!(Server::new(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn start_and_stop() {
        let server = Server::new(ServerConfig::default()).unwrap();
        assert!(server.local_addr().is_none());

        let addr = server.start("127.0.0.1:0").unwrap();
        assert_eq!(server.local_addr(), Some(addr));
        assert!(matches!(server.start("127.0.0.1:0"), Err(Error::AlreadyRunning)));

        server.stop();
        let state = server.service().await_terminated(Some(Duration::from_secs(2)));
        assert_eq!(state, ServiceState::Terminated);
        assert!(!server.is_running());
    }
}
