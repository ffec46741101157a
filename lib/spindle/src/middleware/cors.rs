use crate::middleware::{Middleware, PreOutcome};
use crate::request::{Method, Request};
use crate::response::Response;

/// Which origins are allowed to make cross-origin requests.
pub enum AllowOrigin {
    Any,
    List(Vec<String>),
}

pub struct CorsConfig {
    pub allow_origin: AllowOrigin,
    pub allow_methods: Vec<Method>,
    pub allow_headers: Vec<String>,
    pub allow_credentials: bool,
    pub max_age_secs: Option<u64>,
}

impl CorsConfig {
    /// Any origin, common methods and headers, no credentials.
    pub fn permissive() -> CorsConfig {
        CorsConfig {
            allow_origin: AllowOrigin::Any,
            allow_methods: vec![
                Method::Get,
                Method::Head,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
                Method::Options,
            ],
            allow_headers: vec!["Content-Type".to_string(), "Authorization".to_string()],
            allow_credentials: false,
            max_age_secs: Some(86400),
        }
    }

    /// Allowlisted origins with credentials enabled.
    pub fn restrictive(origins: Vec<String>) -> CorsConfig {
        CorsConfig {
            allow_origin: AllowOrigin::List(origins),
            allow_credentials: true,
            ..CorsConfig::permissive()
        }
    }
}

/// CORS middleware: answers preflights with a short-circuit 204 and tags
/// permitted origins on normal responses.
pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Cors {
        Cors { config }
    }

    /// The `Access-Control-Allow-Origin` value for a request origin, or
    /// `None` when the origin is not permitted.
    fn allow_origin_value(&self, origin: &str) -> Option<String> {
        match &self.config.allow_origin {
            AllowOrigin::Any => {
                if self.config.allow_credentials {
                    // Credentials disallow the wildcard; echo the origin.
                    Some(origin.to_string())
                } else {
                    Some("*".to_string())
                }
            }
            AllowOrigin::List(allowed) => {
                if allowed.iter().any(|entry| entry == origin) {
                    Some(origin.to_string())
                } else {
                    None
                }
            }
        }
    }

    fn is_preflight(req: &Request) -> bool {
        req.method == Method::Options
            && req.headers.contains("origin")
            && req.headers.contains("access-control-request-method")
    }

    fn apply_origin(&self, origin: &str, resp: &mut Response) {
        if let Some(value) = self.allow_origin_value(origin) {
            resp.headers.set("Access-Control-Allow-Origin", value);
            if self.config.allow_credentials {
                resp.headers.set("Access-Control-Allow-Credentials", "true");
            }
            resp.headers.set("Vary", "Origin");
        }
    }
}

impl Middleware for Cors {
    fn pre(&self, req: &mut Request) -> PreOutcome {
        if !Self::is_preflight(req) {
            return PreOutcome::Continue;
        }

        let mut resp = Response::new(204);

        if let Some(origin) = req.headers.get("origin") {
            self.apply_origin(&origin.to_string(), &mut resp);
        }

        let methods: Vec<&str> = self
            .config
            .allow_methods
            .iter()
            .map(|method| method.as_str())
            .collect();
        resp.headers
            .set("Access-Control-Allow-Methods", methods.join(", "));
        resp.headers
            .set("Access-Control-Allow-Headers", self.config.allow_headers.join(", "));
        if let Some(max_age) = self.config.max_age_secs {
            resp.headers
                .set("Access-Control-Max-Age", max_age.to_string());
        }

        PreOutcome::Respond(resp)
    }

    fn post(&self, req: &Request, resp: &mut Response) {
        // Preflight responses are fully formed in pre.
        if Self::is_preflight(req) {
            return;
        }

        if let Some(origin) = req.headers.get("origin") {
            self.apply_origin(&origin.to_string(), resp);
        }
    }
}
