use crate::cookie::Cookie;
use crate::error::{HttpError, HttpResult};
use crate::headers::Headers;
use crate::stream::{Emitter, SseSink};
use serde::Serialize;

/// Reason phrase for a status code. Unknown codes emit "Unknown".
pub fn status_phrase(code: u16) -> &'static str {
    match code {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Response payload: eager bytes or a streaming emitter invoked by the
/// response writer.
pub enum ResponseBody {
    Empty,
    Bytes(Vec<u8>),
    Stream(Emitter),
}

impl ResponseBody {
    pub fn len(&self) -> Option<usize> {
        match self {
            ResponseBody::Empty => Some(0),
            ResponseBody::Bytes(bytes) => Some(bytes.len()),
            ResponseBody::Stream(_) => None,
        }
    }
}

pub struct Response {
    pub status: u16,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            headers: Headers::new(),
            body: ResponseBody::Empty,
        }
    }

    pub fn text<B: Into<String>>(body: B) -> Response {
        let mut response = Response::new(200);
        response.headers.set("Content-Type", "text/plain");
        response.body = ResponseBody::Bytes(body.into().into_bytes());
        response
    }

    pub fn html<B: Into<String>>(body: B) -> Response {
        let mut response = Response::new(200);
        response.headers.set("Content-Type", "text/html; charset=utf-8");
        response.body = ResponseBody::Bytes(body.into().into_bytes());
        response
    }

    pub fn bytes<T: Into<String>>(content_type: T, body: Vec<u8>) -> Response {
        let mut response = Response::new(200);
        response.headers.set("Content-Type", content_type.into());
        response.body = ResponseBody::Bytes(body);
        response
    }

    /// Serialize the value through the external JSON codec.
    pub fn json<T: Serialize>(value: &T) -> HttpResult<Response> {
        let body = serde_json::to_vec(value)
            .map_err(|err| HttpError::internal(format!("json encoding failed: {}", err)))?;
        Ok(Response::bytes("application/json", body))
    }

    pub fn redirect(status: u16, location: &str) -> Response {
        let mut response = Response::new(status);
        response.headers.set("Location", location);
        response
    }

    /// Response with a streaming body. Written with chunked transfer unless
    /// a `Content-Length` header is set before writing.
    pub fn streamed<T: Into<String>>(content_type: T, emitter: Emitter) -> Response {
        let mut response = Response::new(200);
        response.headers.set("Content-Type", content_type.into());
        response.body = ResponseBody::Stream(emitter);
        response
    }

    /// A Server-Sent Events response. The callback receives an event sink;
    /// each send flushes a chunk so events leave immediately.
    pub fn sse<F>(producer: F) -> Response
    where
        F: FnOnce(&mut SseSink) -> std::io::Result<()> + Send + 'static,
    {
        let mut response = Response::new(200);
        response.headers.set("Content-Type", "text/event-stream");
        response.headers.set("Cache-Control", "no-cache");
        response.headers.set("Connection", "keep-alive");
        response.body = ResponseBody::Stream(Box::new(move |sink| {
            let mut events = SseSink::new(sink);
            producer(&mut events)
        }));
        response
    }

    /// Client-visible response for an error, with an opaque body for
    /// internal failures.
    pub fn from_error(err: &HttpError) -> Response {
        let status = err.status_code();
        let mut response = Response::new(status);
        response.headers.set("Content-Type", "text/plain");

        let body = match err {
            HttpError::Internal(_) => "internal server error".to_string(),
            HttpError::RateLimited { retry_after_secs } => {
                response
                    .headers
                    .set("Retry-After", retry_after_secs.to_string());
                format!("{}", err)
            }
            err => format!("{}", err),
        };
        response.body = ResponseBody::Bytes(body.into_bytes());

        response
    }

    pub fn with_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Response {
        self.headers.set(name, value);
        self
    }

    pub fn with_status(mut self, status: u16) -> Response {
        self.status = status;
        self
    }

    /// Append a `Set-Cookie` header; multiple cookies stack.
    pub fn set_cookie(&mut self, cookie: &Cookie) {
        self.headers.append("Set-Cookie", cookie.to_header_value());
    }

    /// Whether this response forces the connection closed.
    pub fn wants_close(&self) -> bool {
        self.headers.has_token("connection", "close")
    }
}
