use std::{error, fmt, io};

/// Failures detected on the I/O thread while a request is still bytes.
///
/// Every parse failure maps to the canonical 400 body; overload maps to the
/// canonical 503. The canned responses are complete wire images so the event
/// loop can attach them without touching the response builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    InvalidRequestLine,
    InvalidMethod,
    InvalidVersion,
    InvalidHeader,
    InvalidContentLength,
    DuplicateContentLength,
    ChunkedUnsupported,
    HeaderSectionTooLarge,
    UriTooLong,
    BodyTooLarge,
    InvalidEncoding,
    MissingBoundary,
    InvalidMultipart,

    Overloaded,
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        pub(crate) const fn as_http(&self) -> &'static [u8] {
            match self { $(
                Self::$name => concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ),
            )* }.as_bytes()
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidRequestLine: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        InvalidMethod: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        InvalidVersion: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        InvalidHeader: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        InvalidContentLength: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        DuplicateContentLength: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        ChunkedUnsupported: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        HeaderSectionTooLarge: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        UriTooLong: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        BodyTooLarge: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        InvalidEncoding: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        MissingBoundary: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;
        InvalidMultipart: "400 Bad Request", "23" => r#"{"error":"Bad Request"}"#;

        Overloaded: "503 Service Unavailable", "50"
            => r#"{"error":"Service Unavailable: Server Overloaded"}"#;
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Fatal startup failures. These terminate the process with a non-zero exit
/// code; nothing here is reachable once the event loops are running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("event loop setup failed: {0}")]
    Poll(#[from] io::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Router(#[from] crate::router::RouterError),
}
