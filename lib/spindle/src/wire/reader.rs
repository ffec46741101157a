use crate::config::ServerConfig;
use crate::error::{HttpError, HttpResult};
use crate::headers::{self, Headers};
use crate::request::{Method, Version};
use crate::uri::Target;
use std::io::BufRead;

/// The parsed request line and header block, before any body handling.
#[derive(Debug)]
pub struct RequestHead {
    pub method: Method,
    pub target: Target,
    pub version: Version,
    pub headers: Headers,
}

impl RequestHead {
    /// True when the head asks for a WebSocket upgrade.
    pub fn is_upgrade(&self) -> bool {
        self.headers.has_token("upgrade", "websocket")
    }
}

/// How the request body is delimited on the wire.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BodyFraming {
    None,
    Sized(usize),
    Chunked,
}

/// Read one line up to `max_len` bytes. `Ok(None)` means the cap was hit
/// before the terminator.
fn read_line_raw(reader: &mut dyn BufRead, max_len: usize) -> HttpResult<Option<Vec<u8>>> {
    let mut line = Vec::new();

    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Err(HttpError::ConnectionClosed);
        }

        match available.iter().position(|&byte| byte == b'\n') {
            Some(at) => {
                line.extend_from_slice(&available[..at]);
                reader.consume(at + 1);

                if line.len() > max_len {
                    return Ok(None);
                }
                return Ok(Some(line));
            }
            None => {
                let count = available.len();
                line.extend_from_slice(available);
                reader.consume(count);

                if line.len() > max_len {
                    return Ok(None);
                }
            }
        }
    }
}

/// Read a CRLF terminated line, without the terminator. Lines that are not
/// CRLF terminated or exceed `max_len` are malformed.
pub fn read_line_crlf(reader: &mut dyn BufRead, max_len: usize) -> HttpResult<String> {
    let mut line = match read_line_raw(reader, max_len)? {
        Some(line) => line,
        None => return Err(HttpError::bad_request("line exceeds the configured cap")),
    };

    if line.pop() != Some(b'\r') {
        return Err(HttpError::bad_request("line not CRLF terminated"));
    }

    Ok(String::from_utf8_lossy(&line).into_owned())
}

/// Parse the request line and header block, enforcing every configured cap.
///
/// A connection closed cleanly before the first byte surfaces as
/// `ConnectionClosed`, which the keep-alive loop treats as a normal end.
pub fn read_head(reader: &mut dyn BufRead, config: &ServerConfig) -> HttpResult<RequestHead> {
    let line = match read_line_raw(reader, config.max_request_line_length)? {
        Some(line) => line,
        None => return Err(HttpError::bad_request("request line too long")),
    };

    let line = {
        let mut line = line;
        if line.pop() != Some(b'\r') {
            return Err(HttpError::bad_request("request line not CRLF terminated"));
        }
        String::from_utf8_lossy(&line).into_owned()
    };

    let mut tokens = line.split(' ');
    let (method_token, target_token, version_token) =
        match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(method), Some(target), Some(version), None) => (method, target, version),
            _ => return Err(HttpError::bad_request("malformed request line")),
        };

    let method = Method::parse(method_token)
        .ok_or_else(|| HttpError::bad_request(format!("unknown method: {}", method_token)))?;

    if !target_token.starts_with('/') && target_token != "*" {
        return Err(HttpError::bad_request("unsupported request target form"));
    }
    let target = Target::parse(target_token);

    let version = Version::parse(version_token)
        .ok_or_else(|| HttpError::bad_request(format!("unsupported version: {}", version_token)))?;

    let mut header_table = Headers::new();

    loop {
        let line = match read_line_raw(reader, config.max_header_size)? {
            Some(line) => line,
            None => return Err(HttpError::HeadersTooLarge),
        };

        let line = {
            let mut line = line;
            if line.pop() != Some(b'\r') {
                return Err(HttpError::bad_request("header line not CRLF terminated"));
            }
            String::from_utf8_lossy(&line).into_owned()
        };

        if line.is_empty() {
            break;
        }

        // Obsolete line folding (a continuation line starting with SP/HTAB)
        // is rejected outright.
        if line.starts_with(' ') || line.starts_with('\t') {
            return Err(HttpError::bad_request("obsolete header line folding"));
        }

        let colon = line
            .find(':')
            .ok_or_else(|| HttpError::bad_request("header line missing colon"))?;
        let name = &line[..colon];
        let value = line[colon + 1..].trim();

        if !headers::valid_name(name) {
            return Err(HttpError::bad_request(format!("invalid header name: {}", name)));
        }

        header_table.append(name, value);

        if header_table.len() > config.max_header_count {
            return Err(HttpError::HeadersTooLarge);
        }
        if header_table.wire_size() > config.max_total_headers_size {
            return Err(HttpError::HeadersTooLarge);
        }
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers: header_table,
    })
}

/// Decide how the body is framed, in priority order: chunked transfer wins
/// over `Content-Length`, absence of both means no body.
pub fn body_framing(head: &RequestHead, config: &ServerConfig) -> HttpResult<BodyFraming> {
    if head.headers.contains("transfer-encoding") {
        if !head.headers.has_token("transfer-encoding", "chunked") {
            return Err(HttpError::NotImplemented("unknown transfer coding".into()));
        }
        if !config.enable_chunked_encoding {
            return Err(HttpError::NotImplemented(
                "chunked transfer encoding is disabled".into(),
            ));
        }
        return Ok(BodyFraming::Chunked);
    }

    let lengths = head.headers.get_all("content-length");
    if lengths.is_empty() {
        return Ok(BodyFraming::None);
    }

    // Duplicate Content-Length headers must agree.
    if lengths.iter().any(|value| *value != lengths[0]) {
        return Err(HttpError::bad_request("conflicting Content-Length headers"));
    }

    let length: usize = lengths[0]
        .trim()
        .parse()
        .map_err(|_| HttpError::bad_request("invalid Content-Length"))?;

    if length > config.max_request_body_size {
        return Err(HttpError::PayloadTooLarge);
    }

    Ok(BodyFraming::Sized(length))
}
