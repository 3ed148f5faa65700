//! RTSP session registry (RFC 2326 §3, §12.37).
//!
//! A session is created by SETUP and names one running [`RtpSender`]. It
//! is identified by a random 64-bit id, sent to the client in decimal in
//! the `Session` header.
//!
//! ## Session lifecycle
//!
//! ```text
//! SETUP            -> registered, sender started (paused)
//! PLAY / PAUSE     -> sender gate opened / closed
//! TEARDOWN         -> removed, sender stopped
//! sender finishes  -> removed (stream exhausted or failed)
//! ```
//!
//! Sessions are not tied to the control connection that created them: a
//! client may reconnect and keep controlling its stream.

pub mod transport;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::transport::sender::RtpSender;
pub use transport::{TransportError, TransportHeader};

/// Parse a `Session` header value, ignoring parameters such as
/// `;timeout=60`.
pub fn parse_session_id(header: &str) -> Option<u64> {
    let id = header.split(';').next().unwrap_or(header).trim();
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

/// Thread-safe registry of active sessions.
///
/// Backed by `parking_lot::RwLock`; lookups on PLAY/PAUSE take the read
/// lock, registration and removal the write lock.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<u64, Arc<RtpSender>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sender` under a fresh random id that is not in use.
    pub fn register(&self, sender: Arc<RtpSender>) -> u64 {
        loop {
            let id = rand::random::<u64>();
            let mut sessions = self.sessions.write();
            if let Entry::Vacant(entry) = sessions.entry(id) {
                entry.insert(sender);
                tracing::debug!(session_id = id, total_sessions = sessions.len(), "session registered");
                return id;
            }
            tracing::trace!(session_id = id, "session id collision, retrying");
        }
    }

    pub fn get(&self, id: u64) -> Option<Arc<RtpSender>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.sessions.read().contains_key(&id)
    }

    /// Remove and return a session.
    pub fn remove(&self, id: u64) -> Option<Arc<RtpSender>> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(&id);
        if removed.is_some() {
            tracing::debug!(session_id = id, total_sessions = sessions.len(), "session removed");
        }
        removed
    }

    pub fn ids(&self) -> Vec<u64> {
        self.sessions.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Remove every session and stop its sender. Returns how many were
    /// stopped.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<(u64, Arc<RtpSender>)> = self.sessions.write().drain().collect();
        for (id, sender) in &drained {
            tracing::debug!(session_id = id, "stopping session");
            sender.stop();
        }
        drained.len()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mjpeg::MjpegReader;
    use crate::transport::sender::SenderConfig;
    use std::net::UdpSocket;

    fn sender(socket: &UdpSocket) -> Arc<RtpSender> {
        Arc::new(
            RtpSender::new(
                socket.local_addr().unwrap(),
                Box::new(MjpegReader::sample()),
                SenderConfig::default(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn parse_session_header() {
        assert_eq!(parse_session_id("12345"), Some(12345));
        assert_eq!(parse_session_id(" 42;timeout=60"), Some(42));
        assert_eq!(parse_session_id(&u64::MAX.to_string()), Some(u64::MAX));
        assert_eq!(parse_session_id("18446744073709551616"), None);
        assert_eq!(parse_session_id("abc"), None);
        assert_eq!(parse_session_id("-1"), None);
        assert_eq!(parse_session_id(""), None);
    }

    #[test]
    fn register_get_remove() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let registry = SessionRegistry::new();

        let a = registry.register(sender(&socket));
        let b = registry.register(sender(&socket));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(a));
        assert!(registry.get(b).is_some());

        assert!(registry.remove(a).is_some());
        assert!(registry.remove(a).is_none());
        assert!(registry.get(a).is_none());
        assert_eq!(registry.ids(), vec![b]);
    }

    #[test]
    fn stop_all_drains() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let registry = SessionRegistry::new();
        let s = sender(&socket);
        registry.register(s.clone());
        registry.register(sender(&socket));

        assert_eq!(registry.stop_all(), 2);
        assert!(registry.is_empty());
        assert!(s.service().state().is_terminal());
    }

    #[test]
    fn clones_share_state() {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let registry = SessionRegistry::new();
        let other = registry.clone();
        let id = registry.register(sender(&socket));
        assert!(other.remove(id).is_some());
        assert!(registry.is_empty());
    }
}
