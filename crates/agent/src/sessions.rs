use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use trustline_core::dialogue::{Session, SessionId, DEFAULT_HISTORY_LIMIT};

pub type SessionHandle = Arc<Mutex<Session>>;

/// Live sessions keyed by id. Each session sits behind its own mutex, so
/// turns for one session run strictly in order while other sessions proceed
/// in parallel. The map lock is only held to look up, insert or remove.
pub struct SessionTable {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    ttl: Duration,
    history_limit: usize,
}

impl SessionTable {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), ttl, history_limit: DEFAULT_HISTORY_LIMIT }
    }

    /// Caps the turn history every newly opened session keeps.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn open(&self, now: DateTime<Utc>) -> (SessionId, SessionHandle) {
        let id = SessionId::generate();
        let session = Session::new(id.clone(), now).with_history_limit(self.history_limit);
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id.clone(), Arc::clone(&handle));
        info!(event_name = "session.opened", session_id = %id, "session opened");
        (id, handle)
    }

    /// An expired session is removed and reported as missing.
    pub async fn get(&self, id: &SessionId, now: DateTime<Utc>) -> Option<SessionHandle> {
        let handle = self.sessions.read().await.get(id).cloned()?;
        let expired = match handle.try_lock() {
            Ok(session) => session.is_expired(self.ttl, now),
            // A turn is in flight, so the session is active.
            Err(_) => false,
        };
        if expired {
            self.sessions.write().await.remove(id);
            info!(event_name = "session.expired", session_id = %id, "session expired");
            return None;
        }
        Some(handle)
    }

    pub async fn close(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(event_name = "session.closed", session_id = %id, "session closed");
        }
        removed
    }

    /// Drops every idle session past its ttl and returns how many went.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|_, handle| match handle.try_lock() {
            Ok(session) => !session.is_expired(ttl, now),
            Err(_) => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(event_name = "session.evicted", evicted, "expired sessions evicted");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
