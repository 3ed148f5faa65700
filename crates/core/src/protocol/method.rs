use std::fmt;
use std::str::FromStr;

use crate::error::{Error, ParseErrorKind};

/// RTSP request methods (RFC 2326 §10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RtspMethod {
    Announce,
    Describe,
    GetParameter,
    Options,
    Pause,
    Play,
    Record,
    Redirect,
    SetParameter,
    Setup,
    Teardown,
}

impl RtspMethod {
    pub const ALL: [RtspMethod; 11] = [
        RtspMethod::Announce,
        RtspMethod::Describe,
        RtspMethod::GetParameter,
        RtspMethod::Options,
        RtspMethod::Pause,
        RtspMethod::Play,
        RtspMethod::Record,
        RtspMethod::Redirect,
        RtspMethod::SetParameter,
        RtspMethod::Setup,
        RtspMethod::Teardown,
    ];

    /// Wire form, e.g. `GET_PARAMETER`.
    pub const fn as_str(self) -> &'static str {
        match self {
            RtspMethod::Announce => "ANNOUNCE",
            RtspMethod::Describe => "DESCRIBE",
            RtspMethod::GetParameter => "GET_PARAMETER",
            RtspMethod::Options => "OPTIONS",
            RtspMethod::Pause => "PAUSE",
            RtspMethod::Play => "PLAY",
            RtspMethod::Record => "RECORD",
            RtspMethod::Redirect => "REDIRECT",
            RtspMethod::SetParameter => "SET_PARAMETER",
            RtspMethod::Setup => "SETUP",
            RtspMethod::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for RtspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RtspMethod {
    type Err = Error;

    /// Method names are case-sensitive (RFC 2326 §6.1).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RtspMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or(Error::parse(ParseErrorKind::InvalidMethod))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for method in RtspMethod::ALL {
            assert_eq!(method.as_str().parse::<RtspMethod>().unwrap(), method);
        }
        assert_eq!(RtspMethod::GetParameter.to_string(), "GET_PARAMETER");
    }

    #[test]
    fn rejects_unknown_and_lowercase() {
        assert!("GET".parse::<RtspMethod>().is_err());
        assert!("setup".parse::<RtspMethod>().is_err());
    }
}
