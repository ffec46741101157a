use crate::cookie::Cookie;
use crate::middleware::{Middleware, PreOutcome};
use crate::request::Request;
use crate::response::Response;
use crate::session::{Session, SessionStore};
use parking_lot::Mutex;
use std::sync::Arc;
use weft::time::timestamp_secs;
use weft::token;

/// Attribute key holding the session handle.
pub const SESSION_ATTR: &str = "session";

pub struct SessionConfig {
    pub cookie_name: String,
    /// Secret signing the session id cookie.
    pub secret: Vec<u8>,
    pub ttl_secs: u64,
    /// Sliding expiration: reads renew the lifetime.
    pub sliding: bool,
    pub cookie_path: String,
    pub http_only: bool,
    pub secure: bool,
}

impl SessionConfig {
    pub fn new<S: Into<Vec<u8>>>(secret: S) -> SessionConfig {
        SessionConfig {
            cookie_name: "session_id".to_string(),
            secret: secret.into(),
            ttl_secs: 3600,
            sliding: true,
            cookie_path: "/".to_string(),
            http_only: true,
            secure: false,
        }
    }
}

struct SessionState {
    session: Session,
    dirty: bool,
    destroyed: bool,
    /// Previous id to purge after `regenerate_id`.
    stale_id: Option<String>,
}

/// Handle onto the request's session, stored in the attribute bag. Writes
/// are deferred: the store and the `Set-Cookie` header are only touched in
/// post-processing.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<SessionState>>,
}

impl SessionHandle {
    fn new(session: Session) -> SessionHandle {
        SessionHandle {
            state: Arc::new(Mutex::new(SessionState {
                session,
                dirty: false,
                destroyed: false,
                stale_id: None,
            })),
        }
    }

    pub fn id(&self) -> String {
        self.state.lock().session.id.clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().session.data.get(key).cloned()
    }

    pub fn set<K: Into<String>, V: Into<String>>(&self, key: K, value: V) {
        let mut state = self.state.lock();
        state.session.data.insert(key.into(), value.into());
        state.dirty = true;
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        let removed = state.session.data.remove(key);
        if removed.is_some() {
            state.dirty = true;
        }
        removed
    }

    /// Drop the session and its cookie at response time.
    pub fn destroy(&self) {
        self.state.lock().destroyed = true;
    }

    /// Swap in a fresh id while keeping the data; the old record is purged
    /// at response time.
    pub fn regenerate_id(&self) {
        let mut state = self.state.lock();
        let old = std::mem::replace(&mut state.session.id, token::session_id());
        state.stale_id = Some(old);
        state.dirty = true;
    }
}

/// The request's session handle, when the session middleware is installed.
pub fn current(req: &Request) -> Option<SessionHandle> {
    req.attrs.get::<SessionHandle>(SESSION_ATTR).cloned()
}

/// Cookie session middleware: resolves the session from a signed cookie on
/// the way in, persists deferred writes and emits `Set-Cookie` on the way
/// out. A fresh session is only allocated in the store once something is
/// written to it.
pub struct SessionMiddleware {
    config: SessionConfig,
    store: Arc<dyn SessionStore>,
}

impl SessionMiddleware {
    pub fn new(config: SessionConfig, store: Arc<dyn SessionStore>) -> SessionMiddleware {
        SessionMiddleware { config, store }
    }

    fn resolve(&self, req: &Request) -> Option<Session> {
        let raw = req.cookie(&self.config.cookie_name)?;
        let id = Cookie::verify_signed(&raw, &self.config.secret)?;
        let session = self.store.get(&id)?;

        if session.is_expired(timestamp_secs()) {
            self.store.delete(&id);
            return None;
        }

        Some(session)
    }

    fn session_cookie(&self, id: &str) -> Cookie {
        Cookie::signed(self.config.cookie_name.clone(), id, &self.config.secret)
            .with_path(self.config.cookie_path.clone())
            .with_max_age(self.config.ttl_secs as i64)
            .with_http_only(self.config.http_only)
            .with_secure(self.config.secure)
    }
}

impl Middleware for SessionMiddleware {
    fn pre(&self, req: &mut Request) -> PreOutcome {
        let session = match self.resolve(req) {
            Some(mut session) => {
                if self.config.sliding {
                    session.touch(self.config.ttl_secs);
                    self.store.save(session.clone());
                }
                session
            }
            None => Session::new(self.config.ttl_secs),
        };

        req.attrs.set(SESSION_ATTR, SessionHandle::new(session));
        PreOutcome::Continue
    }

    fn post(&self, req: &Request, resp: &mut Response) {
        let handle = match req.attrs.get::<SessionHandle>(SESSION_ATTR) {
            Some(handle) => handle,
            None => return,
        };

        let state = handle.state.lock();

        if state.destroyed {
            self.store.delete(&state.session.id);
            if let Some(stale) = &state.stale_id {
                self.store.delete(stale);
            }
            resp.set_cookie(
                &Cookie::delete(self.config.cookie_name.clone())
                    .with_path(self.config.cookie_path.clone()),
            );
            return;
        }

        if let Some(stale) = &state.stale_id {
            self.store.delete(stale);
        }

        if state.dirty {
            self.store.save(state.session.clone());
            resp.set_cookie(&self.session_cookie(&state.session.id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::request::{Method, Version};
    use crate::session::MemorySessionStore;
    use crate::uri::Target;

    const SECRET: &[u8] = b"session secret";

    fn middleware(store: &Arc<MemorySessionStore>) -> SessionMiddleware {
        SessionMiddleware::new(
            SessionConfig::new(SECRET),
            store.clone() as Arc<dyn SessionStore>,
        )
    }

    fn request_with_cookie(raw: Option<&str>) -> Request {
        let mut headers = Headers::new();
        if let Some(raw) = raw {
            headers.append("Cookie", format!("session_id={}", raw));
        }
        Request::new(Method::Get, Target::parse("/x"), Version::Http11, headers)
    }

    #[test]
    fn test_fresh_session_not_persisted_until_written() {
        let store = Arc::new(MemorySessionStore::new());
        let middleware = middleware(&store);

        let mut req = request_with_cookie(None);
        middleware.pre(&mut req);

        let mut resp = Response::new(200);
        middleware.post(&req, &mut resp);

        assert_eq!(store.len(), 0);
        assert!(resp.headers.get("set-cookie").is_none());
    }

    #[test]
    fn test_first_write_persists_and_sets_cookie() {
        let store = Arc::new(MemorySessionStore::new());
        let middleware = middleware(&store);

        let mut req = request_with_cookie(None);
        middleware.pre(&mut req);

        let handle = current(&req).unwrap();
        handle.set("user", "ada");

        let mut resp = Response::new(200);
        middleware.post(&req, &mut resp);

        assert_eq!(store.len(), 1);
        let set_cookie = resp.headers.get("set-cookie").unwrap();
        assert!(set_cookie.starts_with("session_id="));
        assert!(set_cookie.contains("HttpOnly"));

        let stored = store.get(&handle.id()).unwrap();
        assert_eq!(stored.data.get("user").map(String::as_str), Some("ada"));
    }

    #[test]
    fn test_existing_session_resolved_from_signed_cookie() {
        let store = Arc::new(MemorySessionStore::new());
        let middleware = middleware(&store);

        let mut session = Session::new(3600);
        session.data.insert("user".to_string(), "ada".to_string());
        let id = session.id.clone();
        store.save(session);

        let signed = weft::signing::sign(&id, SECRET);
        let mut req = request_with_cookie(Some(&signed));
        middleware.pre(&mut req);

        let handle = current(&req).unwrap();
        assert_eq!(handle.id(), id);
        assert_eq!(handle.get("user").as_deref(), Some("ada"));
    }

    #[test]
    fn test_tampered_cookie_gets_fresh_session() {
        let store = Arc::new(MemorySessionStore::new());
        let middleware = middleware(&store);

        let mut session = Session::new(3600);
        let id = session.id.clone();
        session.data.insert("user".to_string(), "ada".to_string());
        store.save(session);

        let mut req = request_with_cookie(Some(&format!("{}.forgedtag", id)));
        middleware.pre(&mut req);

        let handle = current(&req).unwrap();
        assert_ne!(handle.id(), id);
        assert!(handle.get("user").is_none());
    }

    #[test]
    fn test_regenerate_id_preserves_data() {
        let store = Arc::new(MemorySessionStore::new());
        let middleware = middleware(&store);

        let mut session = Session::new(3600);
        session.data.insert("user".to_string(), "ada".to_string());
        let old_id = session.id.clone();
        store.save(session);

        let signed = weft::signing::sign(&old_id, SECRET);
        let mut req = request_with_cookie(Some(&signed));
        middleware.pre(&mut req);

        let handle = current(&req).unwrap();
        handle.regenerate_id();
        let new_id = handle.id();
        assert_ne!(new_id, old_id);

        let mut resp = Response::new(200);
        middleware.post(&req, &mut resp);

        assert!(store.get(&old_id).is_none());
        let renewed = store.get(&new_id).unwrap();
        assert_eq!(renewed.data.get("user").map(String::as_str), Some("ada"));
    }

    #[test]
    fn test_destroy_deletes_and_expires_cookie() {
        let store = Arc::new(MemorySessionStore::new());
        let middleware = middleware(&store);

        let session = Session::new(3600);
        let id = session.id.clone();
        store.save(session);

        let signed = weft::signing::sign(&id, SECRET);
        let mut req = request_with_cookie(Some(&signed));
        middleware.pre(&mut req);

        current(&req).unwrap().destroy();

        let mut resp = Response::new(200);
        middleware.post(&req, &mut resp);

        assert!(store.get(&id).is_none());
        let set_cookie = resp.headers.get("set-cookie").unwrap();
        assert!(set_cookie.contains("Max-Age=0"));
    }
}
