use crate::cookie::Cookie;
use crate::middleware::{Middleware, PreOutcome};
use crate::request::Request;
use crate::response::Response;
use weft::token;

pub struct CsrfConfig {
    pub cookie_name: String,
    pub header_name: String,
    /// Path globs exempt from the check (`*` matches any run of characters).
    pub exempt: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> CsrfConfig {
        CsrfConfig {
            cookie_name: "XSRF-TOKEN".to_string(),
            header_name: "X-XSRF-TOKEN".to_string(),
            exempt: Vec::new(),
        }
    }
}

/// Simple glob match where `*` matches any (possibly empty) run of
/// characters.
fn glob_match(pattern: &str, path: &str) -> bool {
    fn matches(pattern: &[u8], path: &[u8]) -> bool {
        match pattern.split_first() {
            None => path.is_empty(),
            Some((b'*', rest)) => {
                (0..=path.len()).any(|skip| matches(rest, &path[skip..]))
            }
            Some((byte, rest)) => {
                path.split_first()
                    .map_or(false, |(head, tail)| head == byte && matches(rest, tail))
            }
        }
    }

    matches(pattern.as_bytes(), path.as_bytes())
}

/// Double-submit cookie CSRF protection: mutating requests must present the
/// token both as a cookie and as a header, with equal values.
pub struct Csrf {
    config: CsrfConfig,
}

impl Csrf {
    pub fn new(config: CsrfConfig) -> Csrf {
        Csrf { config }
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.config
            .exempt
            .iter()
            .any(|pattern| glob_match(pattern, path))
    }
}

impl Middleware for Csrf {
    fn pre(&self, req: &mut Request) -> PreOutcome {
        if req.method.is_safe() || self.is_exempt(req.path()) {
            return PreOutcome::Continue;
        }

        let cookie = req.cookie(&self.config.cookie_name);
        let header = req
            .headers
            .get(&self.config.header_name)
            .map(str::to_string);

        match (cookie, header) {
            (Some(cookie), Some(header)) if !cookie.is_empty() && cookie == header => {
                PreOutcome::Continue
            }
            _ => PreOutcome::Respond(
                Response::text("CSRF token missing or mismatched").with_status(403),
            ),
        }
    }

    fn post(&self, req: &Request, resp: &mut Response) {
        // Issue a token cookie when the client has none yet. The cookie is
        // deliberately readable by scripts: double-submit requires the
        // client to copy it into the request header.
        if req.cookie(&self.config.cookie_name).is_none() {
            let cookie =
                Cookie::new(self.config.cookie_name.clone(), token::session_id()).with_path("/");
            resp.set_cookie(&cookie);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::request::{Method, Version};
    use crate::uri::Target;

    fn request(method: Method, path: &str, headers: &[(&str, &str)]) -> Request {
        let mut table = Headers::new();
        for (name, value) in headers {
            table.append(*name, *value);
        }
        Request::new(method, Target::parse(path), Version::Http11, table)
    }

    fn csrf() -> Csrf {
        Csrf::new(CsrfConfig::default())
    }

    #[test]
    fn test_safe_methods_pass() {
        for method in &[Method::Get, Method::Head, Method::Options] {
            let mut req = request(*method, "/submit", &[]);
            assert!(matches!(csrf().pre(&mut req), PreOutcome::Continue));
        }
    }

    #[test]
    fn test_post_without_token_is_403() {
        let mut req = request(Method::Post, "/submit", &[("Cookie", "XSRF-TOKEN=T")]);

        match csrf().pre(&mut req) {
            PreOutcome::Respond(resp) => assert_eq!(resp.status, 403),
            PreOutcome::Continue => panic!("Missing header must be rejected"),
        }
    }

    #[test]
    fn test_post_with_matching_pair_passes() {
        let mut req = request(
            Method::Post,
            "/submit",
            &[("Cookie", "XSRF-TOKEN=T"), ("X-XSRF-TOKEN", "T")],
        );

        assert!(matches!(csrf().pre(&mut req), PreOutcome::Continue));
    }

    #[test]
    fn test_mismatched_pair_is_403() {
        let mut req = request(
            Method::Post,
            "/submit",
            &[("Cookie", "XSRF-TOKEN=T"), ("X-XSRF-TOKEN", "OTHER")],
        );

        assert!(matches!(csrf().pre(&mut req), PreOutcome::Respond(_)));
    }

    #[test]
    fn test_empty_tokens_rejected() {
        let mut req = request(
            Method::Post,
            "/submit",
            &[("Cookie", "XSRF-TOKEN="), ("X-XSRF-TOKEN", "")],
        );

        assert!(matches!(csrf().pre(&mut req), PreOutcome::Respond(_)));
    }

    #[test]
    fn test_exempt_glob() {
        let mut config = CsrfConfig::default();
        config.exempt = vec!["/webhooks/*".to_string()];
        let csrf = Csrf::new(config);

        let mut exempt = request(Method::Post, "/webhooks/github", &[]);
        assert!(matches!(csrf.pre(&mut exempt), PreOutcome::Continue));

        let mut guarded = request(Method::Post, "/submit", &[]);
        assert!(matches!(csrf.pre(&mut guarded), PreOutcome::Respond(_)));
    }

    #[test]
    fn test_token_issued_when_absent() {
        let req = request(Method::Get, "/form", &[]);
        let mut resp = Response::new(200);

        csrf().post(&req, &mut resp);

        let set_cookie = resp.headers.get("set-cookie").unwrap();
        assert!(set_cookie.starts_with("XSRF-TOKEN="));

        // A client that already holds the token is left alone.
        let req = request(Method::Get, "/form", &[("Cookie", "XSRF-TOKEN=T")]);
        let mut resp = Response::new(200);
        csrf().post(&req, &mut resp);
        assert!(resp.headers.get("set-cookie").is_none());
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("/api/*", "/api/v1/users"));
        assert!(glob_match("*", "/anything"));
        assert!(glob_match("/a/*/c", "/a/b/c"));
        assert!(!glob_match("/api/*", "/other"));
        assert!(glob_match("/exact", "/exact"));
        assert!(!glob_match("/exact", "/exact/more"));
    }
}
