//! Middleware pipeline: pre hooks run outermost-first, post hooks run in
//! reverse, and a short-circuiting pre skips the handler plus every inner
//! layer while outer post hooks still observe the response.

pub mod compress;
pub mod cors;
pub mod csrf;
pub mod logging;
pub mod rate_limit;
pub mod request_id;
pub mod session;

use crate::request::Request;
use crate::response::Response;
use std::sync::Arc;

/// Outcome of a middleware pre hook.
pub enum PreOutcome {
    /// Proceed with the (possibly rewritten) request.
    Continue,
    /// Short-circuit with this response; the handler and inner layers are
    /// skipped.
    Respond(Response),
}

pub trait Middleware: Send + Sync {
    fn pre(&self, _req: &mut Request) -> PreOutcome {
        PreOutcome::Continue
    }

    fn post(&self, _req: &Request, _resp: &mut Response) {}
}

/// Identity middleware: continues every request, leaves every response
/// untouched. The unit of pipeline concatenation.
pub struct Passthrough;

impl Middleware for Passthrough {}

struct PreOnly<F>(F);

impl<F> Middleware for PreOnly<F>
where
    F: Fn(&mut Request) -> PreOutcome + Send + Sync,
{
    fn pre(&self, req: &mut Request) -> PreOutcome {
        (self.0)(req)
    }
}

/// A middleware from a pre hook alone.
pub fn pre_only<F>(f: F) -> impl Middleware
where
    F: Fn(&mut Request) -> PreOutcome + Send + Sync,
{
    PreOnly(f)
}

struct PostOnly<F>(F);

impl<F> Middleware for PostOnly<F>
where
    F: Fn(&Request, &mut Response) + Send + Sync,
{
    fn post(&self, req: &Request, resp: &mut Response) {
        (self.0)(req, resp)
    }
}

/// A middleware from a post hook alone.
pub fn post_only<F>(f: F) -> impl Middleware
where
    F: Fn(&Request, &mut Response) + Send + Sync,
{
    PostOnly(f)
}

/// An ordered middleware chain wrapped around a handler. Concatenation is
/// associative with `Passthrough` as identity.
#[derive(Clone, Default)]
pub struct Pipeline {
    chain: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Pipeline {
        Pipeline { chain: Vec::new() }
    }

    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Pipeline {
        self.chain.push(Arc::new(middleware));
        self
    }

    pub fn with_arc(mut self, middleware: Arc<dyn Middleware>) -> Pipeline {
        self.chain.push(middleware);
        self
    }

    /// Concatenate two chains.
    pub fn then(mut self, other: Pipeline) -> Pipeline {
        self.chain.extend(other.chain);
        self
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Run the chain around the handler. For `[m1, m2, m3]` the order is
    /// `m1.pre, m2.pre, m3.pre, handler, m3.post, m2.post, m1.post`; a
    /// `Respond` from `mk.pre` skips the handler and the pre/post hooks of
    /// every layer inside `mk`, while `mk`'s own post and the outer posts
    /// still run.
    pub fn run<H>(&self, req: &mut Request, handler: H) -> Response
    where
        H: FnOnce(&mut Request) -> Response,
    {
        let mut short_circuit = None;
        let mut post_layers = self.chain.len();

        for (at, middleware) in self.chain.iter().enumerate() {
            match middleware.pre(req) {
                PreOutcome::Continue => (),
                PreOutcome::Respond(response) => {
                    short_circuit = Some(response);
                    post_layers = at + 1;
                    break;
                }
            }
        }

        let mut response = match short_circuit {
            Some(response) => response,
            None => handler(req),
        };

        for middleware in self.chain[..post_layers].iter().rev() {
            middleware.post(req, &mut response);
        }

        response
    }
}
