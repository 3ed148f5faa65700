use std::fmt;

/// Lower transports accepted in SETUP. Both mean unicast RTP over UDP.
const SUPPORTED_PROFILES: [&str; 2] = ["RTP/AVP", "RTP/AVP/UDP"];

/// Why a `Transport` header was refused. Answered with
/// `461 Unsupported Transport`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("only RTP/AVP/UDP is currently supported")]
    UnsupportedProfile(String),

    #[error("client_port required")]
    MissingClientPort,

    #[error("invalid client_port")]
    InvalidClientPort(String),
}

/// Client transport parameters from the RTSP `Transport` header
/// (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// Transport: RTP/AVP/UDP;client_port=5000
/// Transport: RTP/AVP;unicast;client_port=5000-5001
/// ```
///
/// Only the RTP port is used; a trailing RTCP port is accepted and kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub profile: String,
    pub client_rtp_port: u16,
    pub client_rtcp_port: Option<u16>,
}

impl TransportHeader {
    /// A plain UDP transport asking for media on `port`.
    pub fn udp(port: u16) -> Self {
        Self {
            profile: "RTP/AVP/UDP".to_string(),
            client_rtp_port: port,
            client_rtcp_port: None,
        }
    }

    /// Parse the `Transport` header value.
    ///
    /// ## Examples
    ///
    /// ```
    /// use rtsp_fec::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_rtp_port, 8000);
    /// assert_eq!(th.client_rtcp_port, Some(8001));
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_err());
    /// ```
    pub fn parse(header: &str) -> Result<Self, TransportError> {
        let mut parts = header.split(';').map(str::trim);
        let profile = parts.next().unwrap_or_default();

        if !SUPPORTED_PROFILES.contains(&profile) {
            return Err(TransportError::UnsupportedProfile(profile.to_string()));
        }

        let ports = parts
            .find_map(|p| p.strip_prefix("client_port="))
            .ok_or(TransportError::MissingClientPort)?;

        let invalid = || TransportError::InvalidClientPort(ports.to_string());
        let (rtp, rtcp) = match ports.split_once('-') {
            Some((rtp, rtcp)) => (rtp, Some(rtcp)),
            None => (ports, None),
        };

        let client_rtp_port = parse_port(rtp).ok_or_else(invalid)?;
        let client_rtcp_port = match rtcp {
            Some(rtcp) => Some(parse_port(rtcp).ok_or_else(invalid)?),
            None => None,
        };

        Ok(Self {
            profile: profile.to_string(),
            client_rtp_port,
            client_rtcp_port,
        })
    }
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for TransportHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};unicast;client_port={}", self.profile, self.client_rtp_port)?;
        if let Some(rtcp) = self.client_rtcp_port {
            write!(f, "-{}", rtcp)?;
        }
        Ok(())
    }
}
