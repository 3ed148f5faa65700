use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use crate::error::Result;

/// Outbound UDP path for one RTP stream.
///
/// Binds an ephemeral socket of the target's address family and sends
/// every datagram to the fixed `target`. The socket stays unconnected so
/// ICMP port-unreachable replies from an absent receiver do not surface
/// as send errors.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket for sending to `target`.
    pub fn bind(target: SocketAddr) -> Result<Self> {
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local)?;
        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send one datagram to the target.
    pub fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, self.target)
    }
}
