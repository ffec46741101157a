use crate::error::{HttpError, HttpResult};
use crate::request::Request;
use crate::response::Response;
use crate::router::PathParams;
use crate::stream::BodyReader;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// The handler contract: a pure function from a fully parsed request to a
/// response. Failures are mapped onto the error taxonomy by the runtime.
pub trait Handler: Send + Sync {
    fn handle(&self, req: &mut Request, params: &PathParams) -> HttpResult<Response>;
}

impl<F> Handler for F
where
    F: Fn(&mut Request, &PathParams) -> HttpResult<Response> + Send + Sync,
{
    fn handle(&self, req: &mut Request, params: &PathParams) -> HttpResult<Response> {
        self(req, params)
    }
}

/// Handler variant that consumes the request body incrementally instead of
/// receiving it buffered. The response may be eager or streaming.
pub trait StreamingHandler: Send + Sync {
    fn handle(
        &self,
        req: &mut Request,
        params: &PathParams,
        body: &mut BodyReader<'_>,
    ) -> HttpResult<Response>;
}

impl<F> StreamingHandler for F
where
    F: Fn(&mut Request, &PathParams, &mut BodyReader<'_>) -> HttpResult<Response> + Send + Sync,
{
    fn handle(
        &self,
        req: &mut Request,
        params: &PathParams,
        body: &mut BodyReader<'_>,
    ) -> HttpResult<Response> {
        self(req, params, body)
    }
}

/// Typed handler over JSON bodies: decodes the request body into `I`
/// (failing with 400), runs the function, encodes the output as JSON.
pub fn json<I, O, F>(f: F) -> impl Handler
where
    I: DeserializeOwned,
    O: Serialize,
    F: Fn(I, &PathParams) -> HttpResult<O> + Send + Sync,
{
    move |req: &mut Request, params: &PathParams| {
        let input: I = serde_json::from_slice(&req.body)
            .map_err(|err| HttpError::bad_request(format!("invalid json body: {}", err)))?;
        let output = f(input, params)?;
        Response::json(&output)
    }
}

/// Typed handler over UTF-8 text bodies.
pub fn text<F>(f: F) -> impl Handler
where
    F: Fn(String, &PathParams) -> HttpResult<String> + Send + Sync,
{
    move |req: &mut Request, params: &PathParams| {
        let input = String::from_utf8(req.body.clone())
            .map_err(|_| HttpError::bad_request("body is not valid UTF-8"))?;
        Ok(Response::text(f(input, params)?))
    }
}

/// Identity-codec handler over raw bytes.
pub fn bytes<F>(f: F) -> impl Handler
where
    F: Fn(&[u8], &PathParams) -> HttpResult<Vec<u8>> + Send + Sync,
{
    move |req: &mut Request, params: &PathParams| {
        Ok(Response::bytes(
            "application/octet-stream",
            f(&req.body, params)?,
        ))
    }
}
