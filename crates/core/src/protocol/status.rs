use std::fmt;

macro_rules! statuses {
    ($($variant:ident = $code:literal, $reason:literal;)+) => {
        /// RTSP/1.0 status codes (RFC 2326 §7.1.1).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RtspStatus {
            $($variant,)+
        }

        impl RtspStatus {
            pub const fn code(self) -> u16 {
                match self {
                    $(RtspStatus::$variant => $code,)+
                }
            }

            pub const fn reason_phrase(self) -> &'static str {
                match self {
                    $(RtspStatus::$variant => $reason,)+
                }
            }

            pub const fn from_code(code: u16) -> Option<Self> {
                match code {
                    $($code => Some(RtspStatus::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

statuses! {
    Continue = 100, "Continue";
    Ok = 200, "OK";
    Created = 201, "Created";
    LowOnStorageSpace = 250, "Low on Storage Space";
    MultipleChoices = 300, "Multiple Choices";
    MovedPermanently = 301, "Moved Permanently";
    MovedTemporarily = 302, "Moved Temporarily";
    SeeOther = 303, "See Other";
    NotModified = 304, "Not Modified";
    UseProxy = 305, "Use Proxy";
    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    PaymentRequired = 402, "Payment Required";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    NotAcceptable = 406, "Not Acceptable";
    ProxyAuthenticationRequired = 407, "Proxy Authentication Required";
    RequestTimeout = 408, "Request Time-out";
    Gone = 410, "Gone";
    LengthRequired = 411, "Length Required";
    PreconditionFailed = 412, "Precondition Failed";
    RequestEntityTooLarge = 413, "Request Entity Too Large";
    RequestUriTooLarge = 414, "Request-URI Too Large";
    UnsupportedMediaType = 415, "Unsupported Media Type";
    ParameterNotUnderstood = 451, "Parameter Not Understood";
    ConferenceNotFound = 452, "Conference Not Found";
    NotEnoughBandwidth = 453, "Not Enough Bandwidth";
    SessionNotFound = 454, "Session Not Found";
    MethodNotValidInThisState = 455, "Method Not Valid in This State";
    HeaderFieldNotValidForResource = 456, "Header Field Not Valid for Resource";
    InvalidRange = 457, "Invalid Range";
    ParameterIsReadOnly = 458, "Parameter Is Read-Only";
    AggregateOperationNotAllowed = 459, "Aggregate operation not allowed";
    OnlyAggregateOperationAllowed = 460, "Only aggregate operation allowed";
    UnsupportedTransport = 461, "Unsupported transport";
    DestinationUnreachable = 462, "Destination unreachable";
    InternalServerError = 500, "Internal Server Error";
    NotImplemented = 501, "Not Implemented";
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    GatewayTimeout = 504, "Gateway Time-out";
    RtspVersionNotSupported = 505, "RTSP Version not supported";
    OptionNotSupported = 551, "Option not supported";
}

impl RtspStatus {
    /// 2xx.
    pub const fn is_success(self) -> bool {
        matches!(self.code(), 200..=299)
    }
}

impl fmt::Display for RtspStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason_phrase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_lookup() {
        assert_eq!(RtspStatus::from_code(454), Some(RtspStatus::SessionNotFound));
        assert_eq!(RtspStatus::from_code(461), Some(RtspStatus::UnsupportedTransport));
        assert_eq!(RtspStatus::from_code(999), None);
        assert_eq!(RtspStatus::from_code(409), None);
    }

    #[test]
    fn display_and_success() {
        assert_eq!(RtspStatus::NotFound.to_string(), "404 Not Found");
        assert!(RtspStatus::Ok.is_success());
        assert!(RtspStatus::LowOnStorageSpace.is_success());
        assert!(!RtspStatus::Continue.is_success());
        assert!(!RtspStatus::MultipleChoices.is_success());
    }
}
