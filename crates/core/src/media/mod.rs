//! Media framing, RTP packetization and FEC.
//!
//! ## RTP overview (RFC 3550)
//!
//! Every video frame travels as exactly one RTP packet with a 12-byte fixed
//! header ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping) for reordering and loss detection.
//! - **Timestamp** (32-bit) in milliseconds, 40 per frame.
//! - **SSRC** (32-bit), randomly chosen to identify the sender.
//!
//! Groups of media packets can additionally be protected by XOR parity
//! packets ([`fec`], RFC 5109) so that a single loss per group is repaired
//! at the receiver.
//!
//! | Module | Purpose | RFC |
//! |--------|---------|-----|
//! | [`rtp`] | Header and packet codec | [RFC 3550](https://tools.ietf.org/html/rfc3550) |
//! | [`fec`] | Parity build and recovery | [RFC 5109](https://tools.ietf.org/html/rfc5109) |
//! | [`mjpeg`] | Length-prefixed JPEG frame source | |
//! | [`pacing`] | Timestamp-driven rate limiting | |

pub mod fec;
pub mod mjpeg;
pub mod pacing;
pub mod rtp;

use bytes::Bytes;

use crate::error::Result;
use rtp::PayloadType;

/// One encoded frame, the unit a [`FrameSource`] yields and a sender
/// transmits as a single RTP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub payload_type: PayloadType,
    pub payload: Bytes,
    /// Presentation time in milliseconds.
    pub timestamp: u32,
}

/// An ordered, possibly finite sequence of frames.
///
/// A sender owns its source and closes it when the stream ends for any
/// reason.
pub trait FrameSource: Send {
    /// The next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<VideoFrame>>;

    /// Release underlying resources. Later calls to
    /// [`next_frame`](Self::next_frame) return `None`.
    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
