//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the body returned by DESCRIBE:
//!
//! ```text
//! v=0                                         ← protocol version
//! o=- 0 <version> IN IP4 <addr>               ← origin
//! s=<session-name>                            ← session name
//! t=0 0                                       ← timing (unbounded)
//! m=video 1024/2 RTP/AVP 26                   ← media description
//! ```
//!
//! `<addr>` is the requester's own address as seen by the server, and
//! `<version>` increases with every description handed out.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::media::rtp::PayloadType;

static LAST_VERSION: AtomicU64 = AtomicU64::new(0);

/// A session version derived from the wall clock in nanoseconds, strictly
/// greater than any value returned before.
pub fn next_version() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64);

    let mut last = LAST_VERSION.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_VERSION.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

/// Generate the session description for one video stream.
pub fn generate_sdp(session_name: &str, addr: IpAddr, payload_type: PayloadType) -> String {
    let address_type = match addr {
        IpAddr::V4(_) => "IP4",
        IpAddr::V6(_) => "IP6",
    };

    let sdp = [
        "v=0".to_string(),
        format!("o=- 0 {} IN {} {}", next_version(), address_type, addr),
        format!("s={}", session_name),
        "t=0 0".to_string(),
        format!("m=video 1024/2 RTP/AVP {}", payload_type.code()),
    ];

    tracing::trace!("SDP: {}", sdp.join(" | "));

    format!("{}\r\n", sdp.join("\r\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_jpeg_sdp() {
        let sdp = generate_sdp("sample.mjpeg", "192.168.1.100".parse().unwrap(), PayloadType::Jpeg);
        let lines: Vec<&str> = sdp.split("\r\n").collect();

        assert_eq!(lines[0], "v=0");
        assert!(lines[1].starts_with("o=- 0 "));
        assert!(lines[1].ends_with(" IN IP4 192.168.1.100"));
        assert_eq!(lines[2], "s=sample.mjpeg");
        assert_eq!(lines[3], "t=0 0");
        assert_eq!(lines[4], "m=video 1024/2 RTP/AVP 26");
        assert_eq!(lines[5], "");
        assert!(sdp.ends_with("\r\n"));
    }

    #[test]
    fn ipv6_origin() {
        let sdp = generate_sdp("x", "::1".parse().unwrap(), PayloadType::Jpeg);
        assert!(sdp.contains(" IN IP6 ::1\r\n"));
    }

    #[test]
    fn versions_increase() {
        let a = next_version();
        let b = next_version();
        let c = next_version();
        assert!(a < b && b < c);
    }
}
