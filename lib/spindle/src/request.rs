use crate::cookie;
use crate::headers::Headers;
use crate::uri::Target;
use hashbrown::HashMap;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
    Trace,
    Connect,
}

impl Method {
    /// Parse a request line method token. Unknown verbs yield `None` and the
    /// request is rejected with 400.
    pub fn parse(token: &str) -> Option<Method> {
        match token {
            "GET" => Some(Method::Get),
            "HEAD" => Some(Method::Head),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "OPTIONS" => Some(Method::Options),
            "PATCH" => Some(Method::Patch),
            "TRACE" => Some(Method::Trace),
            "CONNECT" => Some(Method::Connect),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
        }
    }

    /// Safe methods never mutate server state (CSRF exemption set).
    pub fn is_safe(self) -> bool {
        matches!(self, Method::Get | Method::Head | Method::Options)
    }

    pub(crate) fn index(self) -> u16 {
        match self {
            Method::Get => 0,
            Method::Head => 1,
            Method::Post => 2,
            Method::Put => 3,
            Method::Delete => 4,
            Method::Options => 5,
            Method::Patch => 6,
            Method::Trace => 7,
            Method::Connect => 8,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn parse(token: &str) -> Option<Version> {
        match token {
            "HTTP/1.1" => Some(Version::Http11),
            "HTTP/1.0" => Some(Version::Http10),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

/// Mutable, request scoped bag of untyped values. Middlewares and handlers
/// use it to thread cross cutting data (request id, timing, session) without
/// widening their signatures.
#[derive(Default)]
pub struct Attributes {
    data: HashMap<String, Box<dyn Any + Send>>,
}

impl Attributes {
    pub fn new() -> Attributes {
        Attributes {
            data: HashMap::new(),
        }
    }

    pub fn set<V: Any + Send>(&mut self, key: &str, value: V) {
        self.data.insert(key.to_string(), Box::new(value));
    }

    pub fn get<V: Any + Send>(&self, key: &str) -> Option<&V> {
        self.data.get(key).and_then(|value| value.downcast_ref())
    }

    pub fn take<V: Any + Send>(&mut self, key: &str) -> Option<V> {
        let boxed = self.data.remove(key)?;
        match boxed.downcast::<V>() {
            Ok(value) => Some(*value),
            Err(other) => {
                // Wrong type requested; put the value back untouched.
                self.data.insert(key.to_string(), other);
                None
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

/// A fully parsed request. The wire tuple (method, target, version, headers,
/// body) is settled at parse time; only the attribute bag mutates during
/// processing.
pub struct Request {
    pub method: Method,
    pub target: Target,
    pub version: Version,
    pub headers: Headers,
    /// Buffered body bytes; empty for bodyless or streaming-consumed
    /// requests.
    pub body: Vec<u8>,
    pub attrs: Attributes,
    pub remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn new(method: Method, target: Target, version: Version, headers: Headers) -> Request {
        Request {
            method,
            target,
            version,
            headers,
            body: Vec::new(),
            attrs: Attributes::new(),
            remote_addr: None,
        }
    }

    #[inline]
    pub fn path(&self) -> &str {
        self.target.raw_path()
    }

    pub fn segments(&self) -> Vec<String> {
        self.target.segments()
    }

    /// The media type from `Content-Type`, without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.headers.get("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Request cookies parsed from every `Cookie` header.
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.headers
            .get_all("cookie")
            .iter()
            .flat_map(|raw| cookie::parse_cookie_header(raw))
            .collect()
    }

    /// First cookie value with the given name.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies()
            .into_iter()
            .find(|(cookie_name, _)| cookie_name == name)
            .map(|(_, value)| value)
    }

    /// The client address rendered without the port, used as the default
    /// rate limit key.
    pub fn client_ip(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.ip().to_string())
    }
}
