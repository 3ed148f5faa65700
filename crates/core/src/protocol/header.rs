use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ParseErrorKind};

macro_rules! headers {
    ($($variant:ident => $name:literal,)+) => {
        /// Header fields recognized by the stack (RFC 2326 §12).
        ///
        /// Names match case-insensitively and are written in the canonical
        /// form listed here. Lines naming any other header are ignored.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RtspHeader {
            $($variant,)+
        }

        impl RtspHeader {
            pub const ALL: &'static [RtspHeader] = &[$(RtspHeader::$variant,)+];

            pub const fn as_str(self) -> &'static str {
                match self {
                    $(RtspHeader::$variant => $name,)+
                }
            }
        }
    };
}

headers! {
    Accept => "Accept",
    AcceptEncoding => "Accept-Encoding",
    AcceptLanguage => "Accept-Language",
    Allow => "Allow",
    Authorization => "Authorization",
    Bandwidth => "Bandwidth",
    Blocksize => "Blocksize",
    CacheControl => "Cache-Control",
    Conference => "Conference",
    Connection => "Connection",
    ContentBase => "Content-Base",
    ContentEncoding => "Content-Encoding",
    ContentLanguage => "Content-Language",
    ContentLength => "Content-Length",
    ContentLocation => "Content-Location",
    ContentType => "Content-Type",
    CSeq => "CSeq",
    Date => "Date",
    Expires => "Expires",
    From => "From",
    Host => "Host",
    IfMatch => "If-Match",
    IfModifiedSince => "If-Modified-Since",
    KeyMgmt => "KeyMgmt",
    LastModified => "Last-Modified",
    ProxyAuthenticate => "Proxy-Authenticate",
    ProxyRequire => "Proxy-Require",
    Public => "Public",
    Range => "Range",
    Referer => "Referer",
    Require => "Require",
    RetryAfter => "Retry-After",
    RtpInfo => "RTP-Info",
    Scale => "Scale",
    Session => "Session",
    Server => "Server",
    Speed => "Speed",
    Timestamp => "Timestamp",
    Transport => "Transport",
    Unsupported => "Unsupported",
    UserAgent => "User-Agent",
    Vary => "Vary",
    Via => "Via",
    WwwAuthenticate => "WWW-Authenticate",
}

impl RtspHeader {
    /// Look up a header by name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        RtspHeader::ALL
            .iter()
            .copied()
            .find(|h| h.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for RtspHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RtspHeader {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RtspHeader::from_name(s).ok_or(Error::parse(ParseErrorKind::InvalidHeader))
    }
}

/// Insertion-ordered map from recognized headers to their values.
///
/// Each header appears at most once; repeated occurrences on the wire are
/// merged into one comma-separated value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(RtspHeader, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, header: RtspHeader) -> Option<&str> {
        self.entries
            .iter()
            .find(|(h, _)| *h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, header: RtspHeader) -> bool {
        self.get(header).is_some()
    }

    /// Set `header`, replacing any existing value in place.
    pub fn set(&mut self, header: RtspHeader, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(h, _)| *h == header) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((header, value)),
        }
    }

    /// Set `header` only if it has no value yet.
    pub fn set_if_absent(&mut self, header: RtspHeader, value: impl Into<String>) {
        if !self.contains(header) {
            self.entries.push((header, value.into()));
        }
    }

    /// Add a value, joining it to an existing one with `", "`. Empty
    /// values are ignored.
    pub fn append(&mut self, header: RtspHeader, value: &str) {
        let value = value.trim();
        if value.is_empty() {
            return;
        }
        match self.entries.iter_mut().find(|(h, _)| *h == header) {
            Some((_, existing)) => {
                existing.push_str(", ");
                existing.push_str(value);
            }
            None => self.entries.push((header, value.to_string())),
        }
    }

    pub fn remove(&mut self, header: RtspHeader) -> Option<String> {
        let index = self.entries.iter().position(|(h, _)| *h == header)?;
        Some(self.entries.remove(index).1)
    }

    /// Copy `header` from `other` if present there.
    pub fn copy_from(&mut self, other: &HeaderMap, header: RtspHeader) {
        if let Some(value) = other.get(header) {
            self.set(header, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RtspHeader, &str)> {
        self.entries.iter().map(|(h, v)| (*h, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse one `Name: value` line into the map.
    pub(crate) fn parse_line(&mut self, line: &str) -> crate::error::Result<()> {
        let (name, value) = line
            .split_once(':')
            .ok_or(Error::parse(ParseErrorKind::InvalidHeader))?;

        match RtspHeader::from_name(name.trim()) {
            Some(header) => self.append(header, value),
            None => tracing::trace!(header = name.trim(), "ignoring unknown header"),
        }
        Ok(())
    }
}
