use crate::encoding::base64;
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Size of the raw HMAC-SHA-256 tag in bytes.
pub const TAG_SIZE: usize = 32;

/// Signs the value with the supplied secret, producing `value.tag` where the
/// tag is the base64 HMAC-SHA-256 of the value under the secret.
pub fn sign(value: &str, secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any size");
    mac.update(value.as_bytes());
    let tag = mac.finalize().into_bytes();

    format!("{}.{}", value, base64::encode(tag.as_slice()))
}

/// Verifies a `value.tag` pair produced by `sign`, returning the embedded
/// value when the tag matches under the supplied secret. The tag comparison
/// is constant time.
pub fn verify(signed: &str, secret: &[u8]) -> Option<String> {
    let dot = signed.rfind('.')?;
    let value = &signed[..dot];
    let tag = base64::decode(&signed[dot + 1..]).ok()?;

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any size");
    mac.update(value.as_bytes());

    match mac.verify_slice(&tag) {
        Ok(()) => Some(value.to_string()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"a very well kept server secret";

    #[test]
    fn test_sign_verify_roundtrip() {
        let signed = sign("session-1234", SECRET);

        assert_eq!(verify(&signed, SECRET), Some("session-1234".to_string()));
    }

    #[test]
    fn test_verify_rejects_tampered_value() {
        let signed = sign("balance=10", SECRET);
        let tampered = signed.replacen("10", "99", 1);

        assert_eq!(verify(&tampered, SECRET), None);
    }

    #[test]
    fn test_verify_rejects_tampered_tag() {
        let mut signed = sign("hello", SECRET);
        signed.pop();
        signed.push('A');

        assert_eq!(verify(&signed, SECRET), None);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let signed = sign("hello", SECRET);

        assert_eq!(verify(&signed, b"another secret"), None);
    }

    #[test]
    fn test_verify_rejects_missing_tag() {
        assert_eq!(verify("no-dot-in-here", SECRET), None);
    }

    #[test]
    fn test_value_may_contain_dots() {
        let signed = sign("a.b.c", SECRET);

        assert_eq!(verify(&signed, SECRET), Some("a.b.c".to_string()));
    }
}
