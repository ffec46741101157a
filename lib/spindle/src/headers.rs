/// Returns the canonical (lowercase) form of a header name. All lookups go
/// through this function; header names are never compared raw.
#[inline]
pub fn canonical(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// True if the byte is legal in a header name (RFC 7230 token characters).
#[inline]
fn is_token_byte(byte: u8) -> bool {
    match byte {
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
        | b'`' | b'|' | b'~' => true,
        byte => byte.is_ascii_alphanumeric(),
    }
}

/// True if the name is a valid header name: non-empty, token characters only
/// (which excludes whitespace and control characters).
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_token_byte)
}

/// Case insensitive mapping from header name to an ordered list of values.
///
/// Entries preserve the casing they were inserted with for emission, but all
/// lookups compare canonicalised names.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    #[inline]
    pub fn new() -> Headers {
        Headers {
            entries: Vec::new(),
        }
    }

    /// Number of header entries (multi-valued headers count once per value).
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a value, keeping any existing values for the name.
    pub fn append<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        self.entries.push((name.into(), value.into()));
    }

    /// Replace all values for the name with a single value.
    pub fn set<N: Into<String>, V: Into<String>>(&mut self, name: N, value: V) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Remove all values for the name.
    pub fn remove(&mut self, name: &str) {
        let target = canonical(name);
        self.entries.retain(|(entry, _)| canonical(entry) != target);
    }

    /// First value for the name, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        let target = canonical(name);
        self.entries
            .iter()
            .find(|(entry, _)| canonical(entry) == target)
            .map(|(_, value)| value.as_str())
    }

    /// All values for the name, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let target = canonical(name);
        self.entries
            .iter()
            .filter(|(entry, _)| canonical(entry) == target)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True if the (comma separated) header value list contains the token,
    /// compared case insensitively. Used for `Connection`, `Upgrade` and
    /// `Accept-Encoding` style headers.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name).iter().any(|value| {
            value
                .split(',')
                .any(|item| item.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Iterate entries in insertion order with their original casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Combined size of all names and values, used for the total header cap.
    pub fn wire_size(&self) -> usize {
        self.entries
            .iter()
            .map(|(name, value)| name.len() + value.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "text/plain");

        assert_eq!(headers.get("content-type"), Some("text/plain"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/plain"));
        assert!(headers.contains("cOnTeNt-TyPe"));
    }

    #[test]
    fn test_multi_value_order_preserved() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1");
        headers.append("set-cookie", "b=2");

        assert_eq!(headers.get_all("Set-Cookie"), vec!["a=1", "b=2"]);
        assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
    }

    #[test]
    fn test_set_replaces_all_values() {
        let mut headers = Headers::new();
        headers.append("X-Demo", "one");
        headers.append("x-demo", "two");
        headers.set("X-DEMO", "three");

        assert_eq!(headers.get_all("x-demo"), vec!["three"]);
    }

    #[test]
    fn test_has_token_scans_lists() {
        let mut headers = Headers::new();
        headers.append("Connection", "keep-alive, Upgrade");

        assert!(headers.has_token("connection", "upgrade"));
        assert!(headers.has_token("connection", "keep-alive"));
        assert!(!headers.has_token("connection", "close"));
    }

    #[test]
    fn test_valid_name_rejects_ctls_and_whitespace() {
        assert!(valid_name("Content-Length"));
        assert!(valid_name("x_custom.header~"));
        assert!(!valid_name(""));
        assert!(!valid_name("Bad Header"));
        assert!(!valid_name("Bad\tHeader"));
        assert!(!valid_name("Bad\rHeader"));
        assert!(!valid_name("Bad:Header"));
    }

    #[test]
    fn test_wire_size() {
        let mut headers = Headers::new();
        headers.append("Host", "example.org");

        assert_eq!(headers.wire_size(), "Host".len() + "example.org".len());
    }
}
