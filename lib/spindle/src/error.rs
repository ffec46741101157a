use std::fmt;
use std::io;

pub type HttpResult<T> = Result<T, HttpError>;

/// Error taxonomy of the network runtime. Every variant that can surface to
/// a client maps onto a response status through `status_code`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum HttpError {
    /// Malformed request line, headers, or body for the declared content type.
    BadRequest(String),
    /// A configured body cap was exceeded.
    PayloadTooLarge,
    /// The header block exceeded a configured cap.
    HeadersTooLarge,
    /// No body parser accepts the declared content type.
    UnsupportedMediaType,
    /// Router had no matching route.
    NotFound,
    /// The path matched under a different method.
    MethodNotAllowed,
    Unauthorized,
    Forbidden(String),
    /// Rate middleware rejected the request.
    RateLimited { retry_after_secs: u64 },
    /// Handler failure; the detail is logged, the client gets an opaque body.
    Internal(String),
    /// Chunked transfer while disabled, or an unknown transfer coding.
    NotImplemented(String),
    /// Total request processing time exceeded the configured bound.
    Timeout,
    /// Invalid WebSocket frame or frame sequence.
    WebSocketProtocol(String),
    /// The peer went away mid exchange.
    ConnectionClosed,
    Io(io::ErrorKind),
}

impl HttpError {
    /// Response status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            HttpError::BadRequest(_) => 400,
            HttpError::PayloadTooLarge => 413,
            HttpError::HeadersTooLarge => 431,
            HttpError::UnsupportedMediaType => 415,
            HttpError::NotFound => 404,
            HttpError::MethodNotAllowed => 405,
            HttpError::Unauthorized => 401,
            HttpError::Forbidden(_) => 403,
            HttpError::RateLimited { .. } => 429,
            HttpError::Internal(_) => 500,
            HttpError::NotImplemented(_) => 501,
            HttpError::Timeout => 408,
            HttpError::WebSocketProtocol(_) => 400,
            HttpError::ConnectionClosed => 500,
            HttpError::Io(_) => 500,
        }
    }

    /// True when the connection is beyond saving and no error response
    /// should be attempted.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, HttpError::ConnectionClosed | HttpError::Io(_))
    }

    pub fn bad_request<R: Into<String>>(reason: R) -> HttpError {
        HttpError::BadRequest(reason.into())
    }

    pub fn internal<R: Into<String>>(reason: R) -> HttpError {
        HttpError::Internal(reason.into())
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HttpError::BadRequest(reason) => write!(f, "bad request: {}", reason),
            HttpError::PayloadTooLarge => write!(f, "payload too large"),
            HttpError::HeadersTooLarge => write!(f, "request header fields too large"),
            HttpError::UnsupportedMediaType => write!(f, "unsupported media type"),
            HttpError::NotFound => write!(f, "not found"),
            HttpError::MethodNotAllowed => write!(f, "method not allowed"),
            HttpError::Unauthorized => write!(f, "unauthorized"),
            HttpError::Forbidden(reason) => write!(f, "forbidden: {}", reason),
            HttpError::RateLimited { retry_after_secs } => {
                write!(f, "rate limited, retry after {}s", retry_after_secs)
            }
            HttpError::Internal(reason) => write!(f, "internal error: {}", reason),
            HttpError::NotImplemented(what) => write!(f, "not implemented: {}", what),
            HttpError::Timeout => write!(f, "request timed out"),
            HttpError::WebSocketProtocol(reason) => {
                write!(f, "websocket protocol error: {}", reason)
            }
            HttpError::ConnectionClosed => write!(f, "connection closed by peer"),
            HttpError::Io(kind) => write!(f, "io error: {:?}", kind),
        }
    }
}

impl From<io::Error> for HttpError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => HttpError::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => HttpError::ConnectionClosed,
            kind => HttpError::Io(kind),
        }
    }
}
