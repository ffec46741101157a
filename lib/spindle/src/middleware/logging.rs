use crate::middleware::{Middleware, PreOutcome};
use crate::request::Request;
use crate::response::Response;
use std::time::Instant;
use weft::logging;

/// Attribute key holding the request start time.
pub const START_TIME_ATTR: &str = "request.start";

/// Access logging: stamps the start time on the way in, logs method, path,
/// status and duration on the way out. Placed outermost, it observes
/// short-circuit responses from inner layers too.
pub struct RequestLogging {
    log: logging::Logger,
}

impl RequestLogging {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(log: L) -> RequestLogging {
        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        RequestLogging { log }
    }
}

impl Middleware for RequestLogging {
    fn pre(&self, req: &mut Request) -> PreOutcome {
        req.attrs.set(START_TIME_ATTR, Instant::now());
        PreOutcome::Continue
    }

    fn post(&self, req: &Request, resp: &mut Response) {
        let duration_ms = req
            .attrs
            .get::<Instant>(START_TIME_ATTR)
            .map(|start| start.elapsed().as_millis() as u64)
            .unwrap_or(0);

        logging::info!(self.log, "request";
                       "method" => req.method.as_str(),
                       "path" => req.path(),
                       "status" => resp.status,
                       "duration_ms" => duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::request::{Method, Version};
    use crate::uri::Target;

    #[test]
    fn test_start_time_is_stamped() {
        let middleware = RequestLogging::new(None);
        let mut req = Request::new(
            Method::Get,
            Target::parse("/x"),
            Version::Http11,
            Headers::new(),
        );

        middleware.pre(&mut req);
        assert!(req.attrs.get::<Instant>(START_TIME_ATTR).is_some());

        // Post must not panic with or without the stamp present.
        let mut resp = Response::new(200);
        middleware.post(&req, &mut resp);

        let fresh = Request::new(
            Method::Get,
            Target::parse("/y"),
            Version::Http11,
            Headers::new(),
        );
        middleware.post(&fresh, &mut resp);
    }
}
