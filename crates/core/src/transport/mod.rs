//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! RTSP uses a split transport model:
//!
//! - **TCP** ([`tcp`]): carries RTSP request/response signaling. One TCP
//!   connection per client, with a thread per connection.
//!
//! - **UDP** ([`udp`], [`sender`], [`receiver`]): carries RTP media. Each
//!   sender owns an ephemeral socket aimed at one client port; each
//!   receiver binds one port and reorders what arrives through a
//!   [`jitter`] queue, repairing single losses with FEC.

pub mod jitter;
pub mod receiver;
pub mod sender;
pub(crate) mod tcp;
pub mod udp;

pub use receiver::{ReceiverConfig, ReceiverStats, RtpReceiver};
pub use sender::{RtpSender, SenderConfig};
pub use udp::UdpTransport;
