use crate::ws::conn::WsSender;
use crate::ws::WsHandler;
use crate::wire::reader::RequestHead;
use hashbrown::HashMap;
use parking_lot::Mutex;
use shuttle::{ActorSystem, PoisonPill, Props};
use std::sync::Arc;
use weft::logging;

/// Events a session actor receives from its WebSocket connection. The
/// actor's reply path is the `WsSender` captured by its props factory.
#[derive(Debug)]
pub enum SessionEvent {
    /// Connection established; carries the handshake request's path and
    /// decoded query pairs.
    Connected {
        path: String,
        query: Vec<(String, String)>,
    },
    Text(String),
    Binary(Vec<u8>),
    Pong(Vec<u8>),
}

/// Builds the props for one connection's session actor from the handshake
/// request and the connection's sender.
pub type SessionPropsFn = Arc<dyn Fn(&RequestHead, WsSender) -> Props + Send + Sync>;

/// Hosts each connection's state machine inside a `shuttle` actor.
///
/// On connect a session actor is registered under a per-connection name and
/// told `SessionEvent::Connected`; every frame is decoded into a
/// `SessionEvent` and told to the actor; on close the actor receives a
/// `PoisonPill`, which runs its `post_stop` (unsubscribe and other
/// teardown) and removes it from the system.
pub struct ActorSessionHandler {
    system: ActorSystem,
    prefix: String,
    make_props: SessionPropsFn,
    names: Mutex<HashMap<u64, String>>,
    log: logging::Logger,
}

impl ActorSessionHandler {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        system: ActorSystem,
        prefix: &str,
        make_props: SessionPropsFn,
        log: L,
    ) -> ActorSessionHandler {
        let handler_log = match log.into() {
            Some(log) => log.new(logging::o!("ws_sessions" => prefix.to_string())),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        ActorSessionHandler {
            system,
            prefix: prefix.to_string(),
            make_props,
            names: Mutex::new(HashMap::new()),
            log: handler_log,
        }
    }

    fn actor_name(&self, conn_id: u64) -> Option<String> {
        self.names.lock().get(&conn_id).cloned()
    }

    fn tell(&self, conn_id: u64, event: SessionEvent) {
        if let Some(name) = self.actor_name(conn_id) {
            if let Err(err) = self.system.tell(&name, Box::new(event)) {
                logging::warn!(self.log, "session event delivery failed";
                               "actor" => name,
                               "error" => ?err);
            }
        }
    }
}

impl WsHandler for ActorSessionHandler {
    fn on_connect(&self, conn: &WsSender, head: &RequestHead) {
        let name = format!("{}-{}", self.prefix, conn.id());

        self.system
            .register(&name, (self.make_props)(head, conn.clone()));
        self.names.lock().insert(conn.id(), name.clone());

        logging::debug!(self.log, "session actor registered"; "actor" => &name);

        let connected = SessionEvent::Connected {
            path: head.target.raw_path().to_string(),
            query: head.target.query_pairs(),
        };
        self.tell(conn.id(), connected);
    }

    fn on_text(&self, conn: &WsSender, text: &str) {
        self.tell(conn.id(), SessionEvent::Text(text.to_string()));
    }

    fn on_binary(&self, conn: &WsSender, data: &[u8]) {
        self.tell(conn.id(), SessionEvent::Binary(data.to_vec()));
    }

    fn on_pong(&self, conn: &WsSender, data: &[u8]) {
        self.tell(conn.id(), SessionEvent::Pong(data.to_vec()));
    }

    fn on_close(&self, conn: &WsSender, _status: Option<u16>, _reason: &str) {
        if let Some(name) = self.names.lock().remove(&conn.id()) {
            logging::debug!(self.log, "poisoning session actor"; "actor" => &name);
            let _ = self.system.tell(&name, Box::new(PoisonPill));
        }
    }
}
