use std::fmt;
use std::time::SystemTime;
use weft::signing;
use weft::time::http_date;

/// Cookie attribute construction failure.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InvalidCookie(pub &'static str);

impl fmt::Display for InvalidCookie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "invalid cookie: {}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A response cookie and its attributes.
#[derive(Debug, Clone)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub max_age: Option<i64>,
    pub expires: Option<SystemTime>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Cookie {
        Cookie {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            max_age: None,
            expires: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    /// A cookie whose value carries an HMAC-SHA-256 signature under the
    /// server secret (`value.signature`).
    pub fn signed<N: Into<String>>(name: N, value: &str, secret: &[u8]) -> Cookie {
        Cookie::new(name, signing::sign(value, secret))
    }

    /// Verify a signed cookie value, returning the embedded plain value.
    pub fn verify_signed(value: &str, secret: &[u8]) -> Option<String> {
        signing::verify(value, secret)
    }

    /// An expired empty cookie used to delete the name on the client.
    pub fn delete<N: Into<String>>(name: N) -> Cookie {
        let mut cookie = Cookie::new(name, "");
        cookie.max_age = Some(0);
        cookie.expires = Some(SystemTime::UNIX_EPOCH);
        cookie
    }

    pub fn with_path<P: Into<String>>(mut self, path: P) -> Cookie {
        self.path = Some(path.into());
        self
    }

    pub fn with_domain<D: Into<String>>(mut self, domain: D) -> Cookie {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_max_age(mut self, seconds: i64) -> Cookie {
        self.max_age = Some(seconds);
        self
    }

    pub fn with_expires(mut self, expires: SystemTime) -> Cookie {
        self.expires = Some(expires);
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Cookie {
        self.secure = secure;
        self
    }

    pub fn with_http_only(mut self, http_only: bool) -> Cookie {
        self.http_only = http_only;
        self
    }

    /// Sets the SameSite attribute. `SameSite::None` requires the Secure
    /// attribute to already be set; the combination is rejected otherwise.
    pub fn with_same_site(mut self, same_site: SameSite) -> Result<Cookie, InvalidCookie> {
        if same_site == SameSite::None && !self.secure {
            return Err(InvalidCookie("SameSite=None requires Secure"));
        }

        self.same_site = Some(same_site);
        Ok(self)
    }

    /// The `Set-Cookie` header value for this cookie.
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);

        if let Some(path) = &self.path {
            out.push_str("; Path=");
            out.push_str(path);
        }
        if let Some(domain) = &self.domain {
            out.push_str("; Domain=");
            out.push_str(domain);
        }
        if let Some(max_age) = self.max_age {
            out.push_str(&format!("; Max-Age={}", max_age));
        }
        if let Some(expires) = self.expires {
            out.push_str("; Expires=");
            out.push_str(&http_date(expires));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        if let Some(same_site) = self.same_site {
            out.push_str("; SameSite=");
            out.push_str(same_site.as_str());
        }

        out
    }
}

/// Parse a request `Cookie` header (`a=1; b=2`) into name/value pairs.
/// Malformed items without `=` are skipped.
pub fn parse_cookie_header(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|item| {
            let item = item.trim();
            let at = item.find('=')?;
            let name = item[..at].trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), item[at + 1..].trim().to_string()))
        })
        .collect()
}
