use percent_encoding::percent_decode_str;

/// Percent-decode a path or query component, replacing invalid UTF-8 with
/// the replacement character.
#[inline]
pub fn percent_decode(text: &str) -> String {
    percent_decode_str(text).decode_utf8_lossy().into_owned()
}

/// Decode a form component: `+` means space, then percent decoding.
#[inline]
pub fn form_decode(text: &str) -> String {
    percent_decode(&text.replace('+', " "))
}

/// The request target: raw path plus optional raw query. The query string is
/// never part of the routing key.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Target {
    raw_path: String,
    raw_query: Option<String>,
}

impl Target {
    /// Split the raw request target at the first `?`.
    pub fn parse(raw: &str) -> Target {
        match raw.find('?') {
            Some(at) => Target {
                raw_path: raw[..at].to_string(),
                raw_query: Some(raw[at + 1..].to_string()),
            },
            None => Target {
                raw_path: raw.to_string(),
                raw_query: None,
            },
        }
    }

    #[inline]
    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    #[inline]
    pub fn raw_query(&self) -> Option<&str> {
        self.raw_query.as_deref()
    }

    /// Path segments: the leading `/` is stripped, empty segments (from
    /// `//`) are elided, and each segment is percent-decoded.
    pub fn segments(&self) -> Vec<String> {
        self.raw_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(percent_decode)
            .collect()
    }

    /// Decoded query pairs in order of appearance. Keys without `=` map to
    /// an empty value.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        match &self.raw_query {
            Some(query) => query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| match pair.find('=') {
                    Some(at) => (form_decode(&pair[..at]), form_decode(&pair[at + 1..])),
                    None => (form_decode(pair), String::new()),
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// First query value for the key, if any.
    pub fn query(&self, key: &str) -> Option<String> {
        self.query_pairs()
            .into_iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}
