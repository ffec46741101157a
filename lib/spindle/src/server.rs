use crate::config::ServerConfig;
use crate::error::{HttpError, HttpResult};
use crate::middleware::Pipeline;
use crate::request::{Method, Request, Version};
use crate::response::Response;
use crate::router::{Endpoint, RouteMatch, Router};
use crate::stream::BodyReader;
use crate::wire::reader::{body_framing, read_head, BodyFraming};
use crate::wire::writer::{write_error, write_response};
use crate::ws::{self, WsRouter};
use parking_lot::Mutex;
use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use weft::exec::{TaskSpawner, ThreadSpawner};
use weft::logging;

/// The HTTP/WebSocket server: an accept loop spawning one connection task
/// per accepted socket through the configured spawner.
pub struct Server {
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    ws_router: Arc<WsRouter>,
    pipeline: Arc<Pipeline>,
    spawner: Arc<dyn TaskSpawner>,
    log: logging::Logger,
    shutdown: Arc<AtomicBool>,
    bound: Arc<Mutex<Option<SocketAddr>>>,
    next_conn_id: Arc<AtomicU64>,
}

impl Server {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(config: ServerConfig, log: L) -> Server {
        let server_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Server {
            config: Arc::new(config),
            router: Arc::new(Router::new()),
            ws_router: Arc::new(WsRouter::new()),
            pipeline: Arc::new(Pipeline::new()),
            spawner: Arc::new(ThreadSpawner),
            log: server_log,
            shutdown: Arc::new(AtomicBool::new(false)),
            bound: Arc::new(Mutex::new(None)),
            next_conn_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_router(mut self, router: Router) -> Server {
        self.router = Arc::new(router);
        self
    }

    pub fn with_ws_router(mut self, ws_router: WsRouter) -> Server {
        self.ws_router = Arc::new(ws_router);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Server {
        self.pipeline = Arc::new(pipeline);
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Server {
        self.spawner = spawner;
        self
    }

    /// A handle for stopping the server from another task.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            bound: self.bound.clone(),
        }
    }

    /// Bind the configured port and serve until shut down.
    pub fn run(&self) -> HttpResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))?;
        self.serve(listener)
    }

    /// Serve connections from an already bound listener until shut down.
    pub fn serve(&self, listener: TcpListener) -> HttpResult<()> {
        let addr = listener.local_addr().ok();
        *self.bound.lock() = addr;

        logging::info!(self.log, "server listening";
                       "addr" => addr.map(|addr| addr.to_string()).unwrap_or_default());

        for incoming in listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let stream = match incoming {
                Ok(stream) => stream,
                Err(err) => {
                    logging::warn!(self.log, "accept failed"; "error" => %err);
                    continue;
                }
            };

            // The shutdown wake-up connect lands here; drop it.
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            let config = self.config.clone();
            let router = self.router.clone();
            let ws_router = self.ws_router.clone();
            let pipeline = self.pipeline.clone();
            let conn_log = self.log.new(logging::o!("conn_id" => conn_id));

            self.spawner.spawn(
                &format!("conn-{}", conn_id),
                Box::new(move || {
                    let _ = handle_connection(
                        stream, conn_id, config, router, ws_router, pipeline, conn_log,
                    );
                }),
            );
        }

        logging::info!(self.log, "accept loop stopped");
        Ok(())
    }
}

/// Stops the accept loop: sets the shutdown flag and wakes the blocking
/// accept with a loopback connect. Idempotent.
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    bound: Arc<Mutex<Option<SocketAddr>>>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(addr) = *self.bound.lock() {
            let _ = TcpStream::connect(addr);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Whether the connection stays open after this exchange.
fn keep_alive_after(
    request: &Request,
    response: &Response,
    served: usize,
    config: &ServerConfig,
) -> bool {
    if !config.enable_keep_alive || served >= config.max_keep_alive_requests {
        return false;
    }
    if response.wants_close() || request.headers.has_token("connection", "close") {
        return false;
    }

    match request.version {
        Version::Http10 => request.headers.has_token("connection", "keep-alive"),
        Version::Http11 => true,
    }
}

/// Fold a handler result (including a captured panic) into the response,
/// with an opaque body for internal failures. Runs inside the pipeline so
/// post hooks observe the synthesized error response.
fn settle_handler_result(
    result: std::thread::Result<HttpResult<Response>>,
    log: &logging::Logger,
) -> Response {
    let result = match result {
        Ok(result) => result,
        Err(_) => Err(HttpError::internal("handler panicked")),
    };

    match result {
        Ok(response) => response,
        Err(err) => {
            if let HttpError::Internal(detail) = &err {
                logging::error!(log, "handler failure"; "detail" => detail);
            }
            Response::from_error(&err)
        }
    }
}

/// One connection's lifetime: parse, dispatch, respond, repeat while
/// keep-alive holds; hand the socket to the WebSocket runtime on upgrade.
fn handle_connection(
    stream: TcpStream,
    conn_id: u64,
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    ws_router: Arc<WsRouter>,
    pipeline: Arc<Pipeline>,
    log: logging::Logger,
) -> HttpResult<()> {
    stream.set_read_timeout(Some(config.socket_timeout()))?;
    let _ = stream.set_nodelay(true);
    let remote = stream.peer_addr().ok();

    let mut reader = BufReader::new(stream.try_clone()?);
    let mut out = BufWriter::new(stream.try_clone()?);
    let mut served: usize = 0;

    loop {
        let head = match read_head(&mut reader, &config) {
            Ok(head) => head,
            // A clean close or an idle keep-alive timeout between requests.
            Err(HttpError::ConnectionClosed) | Err(HttpError::Timeout) => break,
            Err(err) => {
                logging::debug!(log, "request parse failed"; "error" => %err);
                if !err.is_connection_fatal() {
                    let _ = write_error(&mut out, &err);
                }
                break;
            }
        };

        served += 1;
        let deadline = Instant::now() + config.request_timeout();

        if head.is_upgrade() {
            // The WebSocket runtime takes ownership of the socket and does
            // not return to the keep-alive loop.
            drop(out);
            return ws::serve_upgrade(reader, stream, head, &ws_router, &log, conn_id);
        }

        let framing = match body_framing(&head, &config) {
            Ok(framing) => framing,
            Err(err) => {
                let _ = write_error(&mut out, &err);
                break;
            }
        };

        let method = head.method;
        let segments = head.target.segments();
        let route = router.dispatch(method, &segments);

        let mut request = Request::new(head.method, head.target, head.version, head.headers);
        request.remote_addr = remote;

        let cap = config.max_request_body_size;
        let mut body_reader = match framing {
            BodyFraming::None => BodyReader::empty(&mut reader, cap),
            BodyFraming::Sized(length) => BodyReader::sized(&mut reader, length, cap),
            BodyFraming::Chunked => BodyReader::chunked(&mut reader, cap),
        };

        let outcome: HttpResult<Response> = match route {
            RouteMatch::NotFound => body_reader.drain().map(|_| {
                pipeline.run(&mut request, |_req| Response::from_error(&HttpError::NotFound))
            }),
            RouteMatch::MethodNotAllowed => body_reader.drain().map(|_| {
                pipeline.run(&mut request, |_req| {
                    Response::from_error(&HttpError::MethodNotAllowed)
                })
            }),
            RouteMatch::Found(Endpoint::Buffered(handler), params) => {
                match body_reader.read_remaining() {
                    Ok(bytes) => {
                        request.body = bytes;
                        Ok(pipeline.run(&mut request, |req| {
                            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                                handler.handle(req, &params)
                            }));
                            settle_handler_result(result, &log)
                        }))
                    }
                    Err(err) => Err(err),
                }
            }
            RouteMatch::Found(Endpoint::Streaming(handler), params) => {
                let response = pipeline.run(&mut request, |req| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        handler.handle(req, &params, &mut body_reader)
                    }));
                    settle_handler_result(result, &log)
                });
                // Whatever the handler left unread must go, or the next
                // request on this connection starts mid-body.
                body_reader.drain().map(|_| response)
            }
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                logging::debug!(log, "body consumption failed"; "error" => %err);
                if !err.is_connection_fatal() {
                    let _ = write_error(&mut out, &err);
                }
                break;
            }
        };

        if Instant::now() > deadline {
            let _ = write_error(&mut out, &HttpError::Timeout);
            break;
        }

        let keep_alive = keep_alive_after(&request, &response, served, &config);

        if let Err(err) = write_response(&mut out, response, keep_alive, method == Method::Head) {
            logging::debug!(log, "response write failed"; "error" => %err);
            break;
        }

        if !keep_alive {
            break;
        }
    }

    let _ = stream.shutdown(Shutdown::Both);
    Ok(())
}
