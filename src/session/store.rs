//! In-memory session store.
//!
//! Sessions live for their TTL and are bounded in number; when full, the
//! least recently accessed session is dropped.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use super::types::{Session, SessionId, SessionSink};
use crate::cas::Identity;

/// Default upper bound on live sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 10_000;

/// Session store keyed by [`SessionId`].
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    max_sessions: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_SESSIONS)
    }

    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Store a session.
    pub fn create(&self, session: Session) -> Result<SessionId> {
        let id = session.id;
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("Session store lock poisoned"))?;

        if sessions.len() >= self.max_sessions && !sessions.contains_key(&id) {
            Self::evict_lru(&mut sessions);
        }
        sessions.insert(id, session);

        Ok(id)
    }

    /// Get session by ID, updating last_accessed time.
    pub fn get(&self, id: SessionId) -> Result<Option<Session>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("Session store lock poisoned"))?;

        let expired = match sessions.get(&id) {
            Some(session) => session.is_expired(),
            None => return Ok(None),
        };

        if expired {
            sessions.remove(&id);
            return Ok(None);
        }

        Ok(sessions.get_mut(&id).map(|session| {
            session.touch();
            session.clone()
        }))
    }

    /// Delete a session by ID.
    pub fn delete(&self, id: SessionId) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("Session store lock poisoned"))?;
        Ok(sessions.remove(&id).is_some())
    }

    /// Evict all expired sessions.
    /// Returns the number of sessions evicted.
    pub fn evict_expired(&self) -> Result<usize> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("Session store lock poisoned"))?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        Ok(before - sessions.len())
    }

    /// Get session count.
    pub fn session_count(&self) -> Result<usize> {
        self.sessions
            .read()
            .map(|s| s.len())
            .map_err(|_| anyhow!("Session store lock poisoned"))
    }

    fn evict_lru(sessions: &mut HashMap<SessionId, Session>) {
        if let Some(oldest_id) = sessions
            .iter()
            .min_by_key(|(_, s)| s.last_accessed)
            .map(|(id, _)| *id)
        {
            debug!(session_id = %oldest_id, "Session store full, evicting least recently used");
            sessions.remove(&oldest_id);
        }
    }
}

impl SessionSink for SessionStore {
    fn establish(
        &self,
        identity: Identity,
        ttl_secs: u64,
        client_ip: Option<String>,
    ) -> Result<Session> {
        let mut session = Session::new(identity, ttl_secs);
        session.client_ip = client_ip;
        self.create(session.clone())?;
        Ok(session)
    }

    fn current(&self, id: SessionId) -> Result<Option<Session>> {
        self.get(id)
    }

    fn end(&self, id: SessionId) -> Result<bool> {
        self.delete(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn identity(id: &str) -> Identity {
        Identity::new(id, BTreeMap::from([("uid".to_string(), id.to_string())]))
    }

    #[test]
    fn test_session_create_and_get() {
        let store = SessionStore::new();
        let session = store.establish(identity("jdoe"), 3600, Some("10.0.0.1".to_string())).unwrap();

        let retrieved = store.current(session.id).unwrap().unwrap();
        assert_eq!(retrieved.principal, "jdoe");
        assert_eq!(retrieved.get_attribute("uid"), Some("jdoe"));
        assert_eq!(retrieved.client_ip.as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn test_session_expiry() {
        let store = SessionStore::new();
        let mut session = Session::new(identity("jdoe"), 3600);
        session.expires_at = Utc::now() - chrono::Duration::seconds(10);
        let id = store.create(session).unwrap();

        assert!(store.get(id).unwrap().is_none());
        assert_eq!(store.session_count().unwrap(), 0);
    }

    #[test]
    fn test_session_delete() {
        let store = SessionStore::new();
        let session = store.establish(identity("jdoe"), 3600, None).unwrap();

        assert!(store.end(session.id).unwrap());
        assert!(!store.end(session.id).unwrap());
        assert!(store.current(session.id).unwrap().is_none());
    }

    #[test]
    fn test_establish_with_huge_ttl() {
        let store = SessionStore::new();
        let session = store
            .establish(identity("jdoe"), 10_000_000_000_000_000, None)
            .unwrap();
        assert!(store.current(session.id).unwrap().is_some());
    }

    #[test]
    fn test_evict_expired() {
        let store = SessionStore::new();
        let mut expired = Session::new(identity("old"), 3600);
        expired.expires_at = Utc::now() - chrono::Duration::seconds(10);
        store.create(expired).unwrap();
        store.establish(identity("fresh"), 3600, None).unwrap();

        assert_eq!(store.evict_expired().unwrap(), 1);
        assert_eq!(store.session_count().unwrap(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let store = SessionStore::with_capacity(2);

        let mut first = Session::new(identity("first"), 3600);
        first.last_accessed = Utc::now() - chrono::Duration::seconds(60);
        let first_id = store.create(first).unwrap();
        let second = store.establish(identity("second"), 3600, None).unwrap();
        let third = store.establish(identity("third"), 3600, None).unwrap();

        assert_eq!(store.session_count().unwrap(), 2);
        assert!(store.get(first_id).unwrap().is_none());
        assert!(store.get(second.id).unwrap().is_some());
        assert!(store.get(third.id).unwrap().is_some());
    }
}
