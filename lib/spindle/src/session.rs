use hashbrown::HashMap;
use parking_lot::Mutex;
use weft::time::timestamp_secs;
use weft::token;

/// Server side state associated with a client, identified by a cookie.
///
/// Invariants: the id is unique and carries at least 128 bits of entropy;
/// `expires > created`; a session is expired once `now > expires`.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created: u64,
    pub last_access: u64,
    pub expires: u64,
    pub data: HashMap<String, String>,
}

impl Session {
    pub fn new(ttl_secs: u64) -> Session {
        let now = timestamp_secs();

        Session {
            id: token::session_id(),
            created: now,
            last_access: now,
            expires: now + ttl_secs.max(1),
            data: HashMap::new(),
        }
    }

    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires
    }

    /// Sliding expiration: reading the session renews its lifetime.
    pub fn touch(&mut self, ttl_secs: u64) {
        let now = timestamp_secs();
        self.last_access = now;
        self.expires = now + ttl_secs.max(1);
    }
}

/// Pluggable session persistence. The default is in-memory; the interface
/// is the whole contract, so stores can live anywhere.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Session>;
    fn save(&self, session: Session);
    fn delete(&self, id: &str);
    /// Drop expired sessions.
    fn cleanup(&self);
}

/// Locked in-memory store; the default.
pub struct MemorySessionStore {
    data: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> MemorySessionStore {
        MemorySessionStore {
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &str) -> Option<Session> {
        self.data.lock().get(id).cloned()
    }

    fn save(&self, session: Session) {
        self.data.lock().insert(session.id.clone(), session);
    }

    fn delete(&self, id: &str) {
        self.data.lock().remove(id);
    }

    fn cleanup(&self) {
        let now = timestamp_secs();
        self.data.lock().retain(|_, session| !session.is_expired(now));
    }
}
