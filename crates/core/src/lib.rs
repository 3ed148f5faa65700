//! RTSP-controlled RTP/UDP video streaming with XOR forward error
//! correction.
//!
//! A [`Server`] answers RTSP requests and, per SETUP, streams an MJPEG
//! source to the client as one RTP packet per frame, optionally followed
//! by FEC packets. A [`Player`] sets up such a stream and receives it
//! through a jitter buffer that reorders packets, repairs single losses
//! and paces delivery by timestamp.

pub mod client;
pub mod error;
pub mod media;
pub mod player;
pub mod protocol;
pub mod server;
pub mod service;
pub mod session;
pub mod transport;

pub use client::RtspClient;
pub use error::{Error, HandlerError, ParseErrorKind, ProtocolError, Result};
pub use player::Player;
pub use server::{Server, ServerConfig};
pub use service::{ServiceHandle, ServiceState};
pub use transport::{ReceiverConfig, ReceiverStats, RtpReceiver, RtpSender, SenderConfig};
