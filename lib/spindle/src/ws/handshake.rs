use crate::error::{HttpError, HttpResult};
use crate::wire::reader::RequestHead;
use sha1::{Digest, Sha1};
use std::io::Write;
use weft::encoding::base64;

/// Fixed GUID appended to the client key when deriving the accept key
/// (RFC 6455 §1.3).
pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Derive the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());

    base64::encode(hasher.finalize().as_slice())
}

/// Validate the upgrade request headers and return the client key. Any
/// failure maps to a 400 and the connection closes.
pub fn validate(head: &RequestHead) -> HttpResult<String> {
    if !head.headers.has_token("upgrade", "websocket") {
        return Err(HttpError::bad_request("missing websocket upgrade header"));
    }
    if !head.headers.has_token("connection", "upgrade") {
        return Err(HttpError::bad_request("connection header missing upgrade"));
    }
    match head.headers.get("sec-websocket-version") {
        Some("13") => (),
        _ => return Err(HttpError::bad_request("unsupported websocket version")),
    }

    match head.headers.get("sec-websocket-key") {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(HttpError::bad_request("missing websocket key")),
    }
}

/// Write the `101 Switching Protocols` response completing the handshake.
pub fn write_accept(out: &mut dyn Write, client_key: &str) -> HttpResult<()> {
    write!(
        out,
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\
         \r\n",
        accept_key(client_key)
    )?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::request::{Method, Version};
    use crate::uri::Target;

    fn upgrade_head(headers: &[(&str, &str)]) -> RequestHead {
        let mut table = Headers::new();
        for (name, value) in headers {
            table.append(*name, *value);
        }
        RequestHead {
            method: Method::Get,
            target: Target::parse("/ws"),
            version: Version::Http11,
            headers: table,
        }
    }

    fn valid_headers() -> Vec<(&'static str, &'static str)> {
        vec![
            ("Host", "example.org"),
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
        ]
    }

    #[test]
    fn test_accept_key_rfc_vector() {
        // The worked example from RFC 6455 §1.3.
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_validate_accepts_well_formed_upgrade() {
        let head = upgrade_head(&valid_headers());

        assert_eq!(validate(&head).unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn test_validate_connection_token_list() {
        let mut headers = valid_headers();
        headers[2] = ("Connection", "keep-alive, Upgrade");
        let head = upgrade_head(&headers);

        assert!(validate(&head).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_pieces() {
        for skip in &["Upgrade", "Connection", "Sec-WebSocket-Key", "Sec-WebSocket-Version"] {
            let headers: Vec<_> = valid_headers()
                .into_iter()
                .filter(|(name, _)| name != skip)
                .collect();
            let head = upgrade_head(&headers);

            assert!(validate(&head).is_err(), "must reject without {}", skip);
        }
    }

    #[test]
    fn test_validate_rejects_wrong_version() {
        let mut headers = valid_headers();
        headers[4] = ("Sec-WebSocket-Version", "8");

        assert!(validate(&upgrade_head(&headers)).is_err());
    }

    #[test]
    fn test_write_accept_shape() {
        let mut out = Vec::new();
        write_accept(&mut out, "dGhlIHNhbXBsZSBub25jZQ==").unwrap();
        let wire = String::from_utf8(out).unwrap();

        assert!(wire.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(wire.contains("Upgrade: websocket\r\n"));
        assert!(wire.contains("Connection: Upgrade\r\n"));
        assert!(wire.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(wire.ends_with("\r\n\r\n"));
    }
}
