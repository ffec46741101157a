//! RFC 6455 WebSocket endpoint multiplexer: handshake over the HTTP
//! upgrade, frame codec, per-connection state machine, and path routing.
//! Long lived sessions can be hosted inside `shuttle` actors via
//! [`session::ActorSessionHandler`].

pub mod conn;
pub mod frame;
pub mod handshake;
pub mod session;

use crate::error::HttpResult;
use crate::wire::reader::RequestHead;
use crate::wire::writer::write_error;
use std::io::BufReader;
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use weft::logging;

pub use self::conn::{close_code, WsConnection, WsSender, WsState, CLOSE_GRACE};
pub use self::frame::{OpCode, WsFrame};

/// Callbacks driving one WebSocket endpoint. All methods default to no-ops
/// so handlers implement only what they need.
pub trait WsHandler: Send + Sync {
    fn on_connect(&self, _conn: &WsSender, _head: &RequestHead) {}

    fn on_text(&self, _conn: &WsSender, _text: &str) {}

    fn on_binary(&self, _conn: &WsSender, _data: &[u8]) {}

    fn on_pong(&self, _conn: &WsSender, _data: &[u8]) {}

    fn on_close(&self, _conn: &WsSender, _status: Option<u16>, _reason: &str) {}
}

/// Path-to-handler routing for WebSocket endpoints. Paths match on
/// normalised segments, exactly.
pub struct WsRouter {
    routes: Vec<(Vec<String>, Arc<dyn WsHandler>)>,
}

impl WsRouter {
    pub fn new() -> WsRouter {
        WsRouter { routes: Vec::new() }
    }

    pub fn route<H: WsHandler + 'static>(mut self, path: &str, handler: H) -> WsRouter {
        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        self.routes.push((segments, Arc::new(handler)));
        self
    }

    pub fn find(&self, segments: &[String]) -> Option<Arc<dyn WsHandler>> {
        self.routes
            .iter()
            .find(|(route, _)| route.as_slice() == segments)
            .map(|(_, handler)| handler.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Take ownership of an upgraded socket and run the WebSocket session on
/// it. Called by the connection runtime once the parsed head asks for an
/// upgrade; it never returns to the HTTP keep-alive loop.
pub fn serve_upgrade(
    reader: BufReader<TcpStream>,
    stream: TcpStream,
    head: RequestHead,
    router: &WsRouter,
    log: &logging::Logger,
    conn_id: u64,
) -> HttpResult<()> {
    let segments = head.target.segments();

    let handler = match router.find(&segments) {
        Some(handler) => handler,
        None => {
            let err = crate::error::HttpError::NotFound;
            let mut out = &stream;
            let _ = write_error(&mut out, &err);
            let _ = stream.shutdown(Shutdown::Both);
            return Err(err);
        }
    };

    let key = match handshake::validate(&head) {
        Ok(key) => key,
        Err(err) => {
            let mut out = &stream;
            let _ = write_error(&mut out, &err);
            let _ = stream.shutdown(Shutdown::Both);
            return Err(err);
        }
    };

    {
        let mut out = &stream;
        handshake::write_accept(&mut out, &key)?;
    }

    logging::debug!(log, "websocket session open";
                    "conn_id" => conn_id,
                    "path" => head.target.raw_path());

    let sender = WsSender::new(conn_id, Box::new(stream.try_clone()?));
    handler.on_connect(&sender, &head);

    let mut conn = WsConnection::new(reader, sender.clone(), log);
    let result = conn.run(handler.as_ref());

    // Grace wait for the peer's close acknowledgment when we initiated.
    if sender.state() == WsState::Closing {
        let _ = stream.set_read_timeout(Some(CLOSE_GRACE));
        conn.await_close_ack();
    }

    let _ = stream.shutdown(Shutdown::Both);

    logging::debug!(log, "websocket session closed"; "conn_id" => conn_id);

    result
}
