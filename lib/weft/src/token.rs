use rand::Rng;
use std::fmt::Write;
use uuid::Uuid;

/// Entropy carried by a session identifier, in bytes.
pub const SESSION_ID_BYTES: usize = 32;

/// Fills the provided buffer with cryptographically secure random bytes.
#[inline]
pub fn fill_random(out: &mut [u8]) {
    rand::rng().fill_bytes(out);
}

/// Generates an opaque session identifier with 256 bits of entropy, rendered
/// as lowercase hex.
pub fn session_id() -> String {
    let mut raw = [0u8; SESSION_ID_BYTES];
    fill_random(&mut raw);

    let mut id = String::with_capacity(SESSION_ID_BYTES * 2);
    for byte in raw.iter() {
        write!(id, "{:02x}", byte).expect("Writing to a string cannot fail");
    }

    id
}

/// Generates a request correlation identifier (UUID v4).
#[inline]
pub fn request_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = session_id();

        assert_eq!(id.len(), SESSION_ID_BYTES * 2);
        assert!(id.chars().all(|chr| chr.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_ids_unique() {
        assert_ne!(session_id(), session_id());
    }

    #[test]
    fn test_request_id_parses_as_uuid() {
        let id = request_id();

        assert!(Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn test_fill_random_varies() {
        let mut first = [0u8; 16];
        let mut second = [0u8; 16];

        fill_random(&mut first);
        fill_random(&mut second);

        assert_ne!(first, second);
    }
}
