use crate::handler::{Handler, StreamingHandler};
use crate::request::Method;
use hashbrown::HashMap;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

/// Bit set of methods a route answers to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MethodMask(u16);

impl MethodMask {
    pub const ANY: MethodMask = MethodMask(0x1ff);

    pub fn of(methods: &[Method]) -> MethodMask {
        MethodMask(
            methods
                .iter()
                .fold(0u16, |mask, method| mask | (1 << method.index())),
        )
    }

    #[inline]
    pub fn contains(self, method: Method) -> bool {
        self.0 & (1 << method.index()) != 0
    }
}

/// Typed segment extractors. A non-matching extractor makes the whole route
/// skip, acting as a pattern guard.
pub enum Extract {
    /// Any single segment.
    Str,
    Int,
    Long,
    Double,
    Bool,
    Uuid,
    /// Full-segment regex match.
    Regex(Regex),
}

impl Extract {
    /// Compile a full-anchored regex extractor. Panics on an invalid
    /// pattern, which is a configuration error.
    pub fn regex(pattern: &str) -> Extract {
        let anchored = format!("^(?:{})$", pattern);
        Extract::Regex(Regex::new(&anchored).expect("Invalid route regex"))
    }

    fn accepts(&self, segment: &str) -> bool {
        match self {
            Extract::Str => true,
            Extract::Int => segment.parse::<i32>().is_ok(),
            Extract::Long => segment.parse::<i64>().is_ok(),
            Extract::Double => segment.parse::<f64>().is_ok(),
            Extract::Bool => segment == "true" || segment == "false",
            Extract::Uuid => Uuid::parse_str(segment).is_ok(),
            Extract::Regex(regex) => regex.is_match(segment),
        }
    }
}

/// One element of a route pattern.
pub enum Pattern {
    /// Fixed segment, matched verbatim.
    Literal(String),
    /// Named extractor over a single segment.
    Param { name: String, extract: Extract },
    /// Named catch-all for the remaining segments; only valid in last
    /// position.
    Rest(String),
}

/// Parse a route template into a pattern vector.
///
/// Template syntax per segment: a literal, `{name}` (any segment),
/// `{name:int}` / `{name:long}` / `{name:double}` / `{name:bool}` /
/// `{name:uuid}`, `{name:re:PATTERN}`, or `*name` as the trailing rest
/// capture. Malformed templates panic at configuration time.
pub fn parse_template(template: &str) -> Vec<Pattern> {
    let segments: Vec<&str> = template
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let mut pattern = Vec::with_capacity(segments.len());

    for (at, segment) in segments.iter().enumerate() {
        if let Some(name) = segment.strip_prefix('*') {
            if at != segments.len() - 1 {
                panic!("Rest capture must be the last template segment: {}", template);
            }
            pattern.push(Pattern::Rest(name.to_string()));
        } else if segment.starts_with('{') && segment.ends_with('}') {
            let body = &segment[1..segment.len() - 1];
            let (name, extract) = match body.find(':') {
                None => (body, Extract::Str),
                Some(at) => {
                    let name = &body[..at];
                    let kind = &body[at + 1..];
                    let extract = match kind {
                        "int" => Extract::Int,
                        "long" => Extract::Long,
                        "double" => Extract::Double,
                        "bool" => Extract::Bool,
                        "uuid" => Extract::Uuid,
                        kind => match kind.strip_prefix("re:") {
                            Some(pattern) => Extract::regex(pattern),
                            None => panic!("Unknown extractor kind: {}", kind),
                        },
                    };
                    (name, extract)
                }
            };

            if name.is_empty() {
                panic!("Route parameter must be named: {}", template);
            }

            pattern.push(Pattern::Param {
                name: name.to_string(),
                extract,
            });
        } else {
            pattern.push(Pattern::Literal((*segment).to_string()));
        }
    }

    pattern
}

/// Values captured by route parameters, with typed accessors mirroring the
/// extractors.
#[derive(Debug, Clone, Default)]
pub struct PathParams {
    values: HashMap<String, String>,
}

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        self.get(name)?.parse().ok()
    }

    pub fn long(&self, name: &str) -> Option<i64> {
        self.get(name)?.parse().ok()
    }

    pub fn double(&self, name: &str) -> Option<f64> {
        self.get(name)?.parse().ok()
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name)?.parse().ok()
    }

    pub fn uuid(&self, name: &str) -> Option<Uuid> {
        Uuid::parse_str(self.get(name)?).ok()
    }

    fn insert(&mut self, name: &str, value: String) {
        self.values.insert(name.to_string(), value);
    }
}

/// A route target: buffered handlers receive the body in memory, streaming
/// handlers pull it off the wire themselves.
#[derive(Clone)]
pub enum Endpoint {
    Buffered(Arc<dyn Handler>),
    Streaming(Arc<dyn StreamingHandler>),
}

struct Route {
    methods: MethodMask,
    pattern: Vec<Pattern>,
    endpoint: Endpoint,
}

/// Outcome of dispatching `(method, segments)` against the route table.
pub enum RouteMatch {
    Found(Endpoint, PathParams),
    /// A pattern matched the path, but under different methods.
    MethodNotAllowed,
    NotFound,
}

fn match_pattern(pattern: &[Pattern], segments: &[String]) -> Option<PathParams> {
    let has_rest = matches!(pattern.last(), Some(Pattern::Rest(_)));

    if has_rest {
        if segments.len() < pattern.len() - 1 {
            return None;
        }
    } else if segments.len() != pattern.len() {
        return None;
    }

    let mut params = PathParams::default();

    for (at, element) in pattern.iter().enumerate() {
        match element {
            Pattern::Literal(literal) => {
                if segments[at] != *literal {
                    return None;
                }
            }
            Pattern::Param { name, extract } => {
                if !extract.accepts(&segments[at]) {
                    return None;
                }
                params.insert(name, segments[at].clone());
            }
            Pattern::Rest(name) => {
                params.insert(name, segments[at..].join("/"));
            }
        }
    }

    Some(params)
}

/// Ordered dispatch table from `(method, path pattern)` to handlers. Match
/// order is registration order; the first hit wins.
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Router {
        Router { routes: Vec::new() }
    }

    pub fn route<H: Handler + 'static>(
        mut self,
        methods: &[Method],
        template: &str,
        handler: H,
    ) -> Router {
        self.routes.push(Route {
            methods: MethodMask::of(methods),
            pattern: parse_template(template),
            endpoint: Endpoint::Buffered(Arc::new(handler)),
        });
        self
    }

    /// Register a handler that consumes its body as a stream.
    pub fn stream_route<H: StreamingHandler + 'static>(
        mut self,
        methods: &[Method],
        template: &str,
        handler: H,
    ) -> Router {
        self.routes.push(Route {
            methods: MethodMask::of(methods),
            pattern: parse_template(template),
            endpoint: Endpoint::Streaming(Arc::new(handler)),
        });
        self
    }

    pub fn get<H: Handler + 'static>(self, template: &str, handler: H) -> Router {
        self.route(&[Method::Get], template, handler)
    }

    pub fn post<H: Handler + 'static>(self, template: &str, handler: H) -> Router {
        self.route(&[Method::Post], template, handler)
    }

    pub fn put<H: Handler + 'static>(self, template: &str, handler: H) -> Router {
        self.route(&[Method::Put], template, handler)
    }

    pub fn delete<H: Handler + 'static>(self, template: &str, handler: H) -> Router {
        self.route(&[Method::Delete], template, handler)
    }

    /// Append another router's routes as a sequential fallback.
    pub fn merge(mut self, other: Router) -> Router {
        self.routes.extend(other.routes);
        self
    }

    /// Prefix every route of `router` with the fixed segments of `prefix`.
    pub fn mount(prefix: &str, router: Router) -> Router {
        let prefix_segments: Vec<String> = prefix
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();

        let routes = router
            .routes
            .into_iter()
            .map(|route| {
                let mut pattern: Vec<Pattern> = prefix_segments
                    .iter()
                    .map(|segment| Pattern::Literal(segment.clone()))
                    .collect();
                pattern.extend(route.pattern);
                Route {
                    methods: route.methods,
                    pattern,
                    endpoint: route.endpoint,
                }
            })
            .collect();

        Router { routes }
    }

    /// Dispatch a request key. Patterns are tried in registration order; a
    /// path that only matches under other methods reports 405.
    pub fn dispatch(&self, method: Method, segments: &[String]) -> RouteMatch {
        let mut path_matched = false;

        for route in &self.routes {
            if let Some(params) = match_pattern(&route.pattern, segments) {
                if route.methods.contains(method) {
                    return RouteMatch::Found(route.endpoint.clone(), params);
                }
                path_matched = true;
            }
        }

        if path_matched {
            RouteMatch::MethodNotAllowed
        } else {
            RouteMatch::NotFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpResult;
    use crate::request::Request;
    use crate::response::Response;

    fn tag(name: &'static str) -> impl Handler {
        move |_req: &mut Request, _params: &PathParams| -> HttpResult<Response> {
            Ok(Response::text(name))
        }
    }

    fn segments(path: &str) -> Vec<String> {
        crate::uri::Target::parse(path).segments()
    }

    fn dispatched(router: &Router, method: Method, path: &str) -> Option<PathParams> {
        match router.dispatch(method, &segments(path)) {
            RouteMatch::Found(_, params) => Some(params),
            _ => None,
        }
    }

    #[test]
    fn test_literal_match_and_404() {
        let router = Router::new().get("/hello", tag("hello"));

        assert!(dispatched(&router, Method::Get, "/hello").is_some());
        assert!(matches!(
            router.dispatch(Method::Get, &segments("/nope")),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn test_method_mismatch_is_405() {
        let router = Router::new().get("/hello", tag("hello"));

        assert!(matches!(
            router.dispatch(Method::Post, &segments("/hello")),
            RouteMatch::MethodNotAllowed
        ));
    }

    #[test]
    fn test_typed_extractors_guard_matching() {
        let router = Router::new()
            .get("/users/{id:int}", tag("by-id"))
            .get("/users/{name}", tag("by-name"));

        let by_id = dispatched(&router, Method::Get, "/users/42").unwrap();
        assert_eq!(by_id.int("id"), Some(42));

        // Non-numeric falls through to the later, looser route.
        let by_name = dispatched(&router, Method::Get, "/users/ada").unwrap();
        assert_eq!(by_name.get("name"), Some("ada"));
        assert_eq!(by_name.get("id"), None);
    }

    #[test]
    fn test_first_match_wins_in_registration_order() {
        let router = Router::new()
            .get("/x/{a}", tag("first"))
            .get("/x/{b}", tag("second"));

        let params = dispatched(&router, Method::Get, "/x/1").unwrap();
        assert_eq!(params.get("a"), Some("1"));
    }

    #[test]
    fn test_uuid_bool_double_extractors() {
        let router = Router::new()
            .get("/u/{id:uuid}", tag("uuid"))
            .get("/b/{flag:bool}", tag("bool"))
            .get("/d/{ratio:double}", tag("double"));

        let params = dispatched(
            &router,
            Method::Get,
            "/u/9f2c3bfa-8d1e-4c7a-9b77-0a8cbb1f2f10",
        )
        .unwrap();
        assert!(params.uuid("id").is_some());

        assert!(dispatched(&router, Method::Get, "/u/not-a-uuid").is_none());

        assert_eq!(
            dispatched(&router, Method::Get, "/b/true").unwrap().boolean("flag"),
            Some(true)
        );
        assert!(dispatched(&router, Method::Get, "/b/yes").is_none());

        assert_eq!(
            dispatched(&router, Method::Get, "/d/3.25").unwrap().double("ratio"),
            Some(3.25)
        );
    }

    #[test]
    fn test_regex_extractor_is_full_match() {
        let router = Router::new().get("/files/{name:re:[a-z]+\\.txt}", tag("file"));

        assert!(dispatched(&router, Method::Get, "/files/notes.txt").is_some());
        assert!(dispatched(&router, Method::Get, "/files/notes.txt.exe").is_none());
        assert!(dispatched(&router, Method::Get, "/files/NOTES.txt").is_none());
    }

    #[test]
    fn test_rest_capture() {
        let router = Router::new().get("/static/*path", tag("static"));

        let params = dispatched(&router, Method::Get, "/static/css/site.css").unwrap();
        assert_eq!(params.get("path"), Some("css/site.css"));

        let empty = dispatched(&router, Method::Get, "/static").unwrap();
        assert_eq!(empty.get("path"), Some(""));
    }

    #[test]
    fn test_mount_prefixes_routes() {
        let api = Router::new().get("/users/{id:int}", tag("users"));
        let router = Router::mount("/api/v1", api);

        assert!(dispatched(&router, Method::Get, "/api/v1/users/7").is_some());
        assert!(dispatched(&router, Method::Get, "/users/7").is_none());
    }

    #[test]
    fn test_merge_is_sequential_fallback() {
        let first = Router::new().get("/a", tag("first"));
        let second = Router::new().get("/b", tag("second"));
        let router = first.merge(second);

        assert!(dispatched(&router, Method::Get, "/a").is_some());
        assert!(dispatched(&router, Method::Get, "/b").is_some());
    }

    #[test]
    #[should_panic(expected = "Rest capture must be the last template segment")]
    fn test_rest_must_be_last() {
        parse_template("/a/*rest/b");
    }

    #[test]
    #[should_panic(expected = "Unknown extractor kind")]
    fn test_unknown_extractor_panics() {
        parse_template("/a/{x:decimal}");
    }
}
