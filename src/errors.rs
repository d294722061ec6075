use crate::{query, Version};
use std::{error, fmt, io};

/// The high-level action a connection worker takes in response to an
/// [`ErrorKind`], per the §7 action table. One place to ask "what do I do
/// with this error" instead of re-deriving it at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorAction {
    /// Emit a status response (if nothing has been written yet) and close.
    RespondAndClose,
    /// Close without attempting a response; log at debug level, not error.
    CloseSilently,
    /// Close without attempting a response; the reaper already decided this.
    CloseTimedOut,
}

#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,

    InvalidHeader,
    TooManyHeaders,
    HeadersTooLarge,
    InvalidContentLength,
    InvalidConnection,

    BodyTooLarge,
    #[allow(dead_code)]
    BodyMismatch {
        expected: usize,
        available: usize,
    },
    #[allow(dead_code)]
    UnexpectedBody(usize),
    InvalidChunkSize,
    PrematureEof,

    RequestTimeout,

    ServiceUnavailable,
    Io(IoError),
}

impl ErrorKind {
    /// Maps this error to the worker-level action per §7's taxonomy.
    ///
    /// `BadRequest`-class errors (malformed preamble, oversized header/body,
    /// bad chunk framing) respond then close. `ClientAbort`/`PrematureEOF`
    /// close silently: the peer is gone, nothing profits from a response.
    /// `Timeout` closes without a response attempt at all, distinct from the
    /// other two because the reaper (not the parser) made the call.
    pub(crate) const fn classify(&self) -> ErrorAction {
        match self {
            ErrorKind::InvalidMethod
            | ErrorKind::InvalidUrl
            | ErrorKind::Query(_)
            | ErrorKind::InvalidVersion
            | ErrorKind::UnsupportedVersion
            | ErrorKind::InvalidHeader
            | ErrorKind::TooManyHeaders
            | ErrorKind::HeadersTooLarge
            | ErrorKind::InvalidContentLength
            | ErrorKind::InvalidConnection
            | ErrorKind::BodyTooLarge
            | ErrorKind::BodyMismatch { .. }
            | ErrorKind::UnexpectedBody(_)
            | ErrorKind::InvalidChunkSize
            | ErrorKind::ServiceUnavailable => ErrorAction::RespondAndClose,

            ErrorKind::PrematureEof | ErrorKind::Io(_) => ErrorAction::CloseSilently,

            ErrorKind::RequestTimeout => ErrorAction::CloseTimedOut,
        }
    }
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(
            &self,
            version: Version,
            json: bool,
        ) -> &'static [u8] {
            match (json, self, version) { $(
                (true, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http11) => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
                (true, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
                (false, Self::$name { .. }, Version::Http10) => concat!(
                    "HTTP/1.0 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n\r\n",
                ),
            )*
                _ => unreachable!(),
            }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;

        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        InvalidVersion: "400 Bad Request", "57"
            => r#"{"error":"Invalid HTTP version","code":"INVALID_VERSION"}"#;
        UnsupportedVersion: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_VERSION"}"#;

        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        TooManyHeaders: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Too many headers","code":"TOO_MANY_HEADERS"}"#;
        HeadersTooLarge: "431 Request Header Fields Too Large", "57"
            => r#"{"error":"Request headers too large","code":"HEADERS_TOO_LARGE"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;

        BodyTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;
        UnexpectedBody: "400 Bad Request", "60"
            => r#"{"error":"Unexpected request body","code":"UNEXPECTED_BODY"}"#;
        InvalidChunkSize: "400 Bad Request", "58"
            => r#"{"error":"Invalid chunk size","code":"INVALID_CHUNK_SIZE"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => ErrorKind::PrematureEof,
            io::ErrorKind::TimedOut => ErrorKind::RequestTimeout,
            _ => ErrorKind::Io(IoError(err)),
        }
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_bad_request_variants() {
        assert_eq!(ErrorKind::InvalidMethod.classify(), ErrorAction::RespondAndClose);
        assert_eq!(ErrorKind::InvalidChunkSize.classify(), ErrorAction::RespondAndClose);
        assert_eq!(ErrorKind::BodyTooLarge.classify(), ErrorAction::RespondAndClose);
    }

    #[test]
    fn classify_client_abort_variants() {
        assert_eq!(ErrorKind::PrematureEof.classify(), ErrorAction::CloseSilently);
    }

    #[test]
    fn classify_timeout() {
        assert_eq!(ErrorKind::RequestTimeout.classify(), ErrorAction::CloseTimedOut);
    }

    #[test]
    fn io_error_conversion_maps_eof_to_premature() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(ErrorKind::from(io_err), ErrorKind::PrematureEof);
    }

    #[test]
    fn io_error_conversion_maps_timeout() {
        let io_err = io::Error::new(io::ErrorKind::TimedOut, "timeout");
        assert_eq!(ErrorKind::from(io_err), ErrorKind::RequestTimeout);
    }
}
