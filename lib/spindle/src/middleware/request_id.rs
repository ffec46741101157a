use crate::middleware::{Middleware, PreOutcome};
use crate::request::Request;
use crate::response::Response;
use weft::token;

/// Attribute key holding the request correlation id.
pub const REQUEST_ID_ATTR: &str = "request.id";

/// Generates a UUID per request, stores it on the attribute bag and echoes
/// it as `X-Request-Id` on the response.
pub struct RequestId;

impl Middleware for RequestId {
    fn pre(&self, req: &mut Request) -> PreOutcome {
        req.attrs.set(REQUEST_ID_ATTR, token::request_id());
        PreOutcome::Continue
    }

    fn post(&self, req: &Request, resp: &mut Response) {
        if let Some(id) = req.attrs.get::<String>(REQUEST_ID_ATTR) {
            resp.headers.set("X-Request-Id", id.clone());
        }
    }
}
