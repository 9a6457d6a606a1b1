//! Registry of live sessions, shared between the accept loop, connection
//! threads and the workspace publisher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use crate::protocol::SessionId;

use super::queue::{Session, DEFAULT_MAX_DIFFS};
use super::SessionError;

/// Concurrent map of session id to session, plus the retention limit
/// applied to every current and future session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    retention_limit: Mutex<usize>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_MAX_DIFFS)
    }

    pub fn with_retention(limit: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            retention_limit: Mutex::new(limit),
        }
    }

    /// Allocate a session under a fresh random id. Uuid v4 ids come from the
    /// OS CSPRNG, so they double as unguessable resume tokens.
    pub fn create(&self) -> (SessionId, Arc<Mutex<Session>>) {
        let id = Uuid::new_v4();
        let limit = *self.retention_limit.lock().expect("retention lock poisoned");
        let session = Arc::new(Mutex::new(Session::new(id, limit)));
        self.sessions
            .write()
            .expect("session map poisoned")
            .insert(id, Arc::clone(&session));
        (id, session)
    }

    pub fn lookup(&self, id: &SessionId) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .get(id)
            .cloned()
            .ok_or(SessionError::NotFound)
    }

    /// Close and remove a session. Returns false for unknown ids.
    pub fn close(&self, id: &SessionId) -> bool {
        let removed = self
            .sessions
            .write()
            .expect("session map poisoned")
            .remove(id);
        match removed {
            Some(session) => {
                session.lock().expect("session lock poisoned").close();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().expect("session map poisoned").len()
    }

    /// Update the retention cap for all current sessions and for sessions
    /// created afterwards.
    pub fn set_retention_limit(&self, limit: usize) {
        *self.retention_limit.lock().expect("retention lock poisoned") = limit;
        for session in self
            .sessions
            .read()
            .expect("session map poisoned")
            .values()
        {
            session
                .lock()
                .expect("session lock poisoned")
                .set_retention(limit);
        }
    }

    /// Snapshot of the live sessions for publisher iteration.
    pub fn sessions(&self) -> Vec<(SessionId, Arc<Mutex<Session>>)> {
        self.sessions
            .read()
            .expect("session map poisoned")
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::BufferDelta;

    fn delta() -> BufferDelta {
        BufferDelta {
            pane_id: Uuid::nil(),
            revision: 1,
            flags: 0,
            styles: vec![],
            rows: vec![],
        }
    }

    #[test]
    fn create_then_lookup_returns_the_same_session() {
        let registry = SessionRegistry::new();
        let (id, session) = registry.create();
        let found = registry.lookup(&id).unwrap();
        assert!(Arc::ptr_eq(&session, &found));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn lookup_of_unknown_id_fails() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.lookup(&Uuid::new_v4()).err(),
            Some(SessionError::NotFound)
        );
    }

    #[test]
    fn close_removes_and_marks_closed() {
        let registry = SessionRegistry::new();
        let (id, session) = registry.create();
        assert!(registry.close(&id));
        assert!(!registry.close(&id));
        assert_eq!(registry.active_count(), 0);
        assert!(session.lock().unwrap().is_closed());
    }

    #[test]
    fn session_ids_are_unique() {
        let registry = SessionRegistry::new();
        let (a, _) = registry.create();
        let (b, _) = registry.create();
        assert_ne!(a, b);
    }

    #[test]
    fn retention_limit_applies_to_existing_and_new_sessions() {
        let registry = SessionRegistry::with_retention(100);
        let (_, existing) = registry.create();
        registry.set_retention_limit(2);

        {
            let mut s = existing.lock().unwrap();
            for _ in 0..5 {
                s.enqueue_diff(&delta()).unwrap();
            }
            assert_eq!(s.pending_len(), 2);
        }

        let (_, fresh) = registry.create();
        let mut s = fresh.lock().unwrap();
        for _ in 0..5 {
            s.enqueue_diff(&delta()).unwrap();
        }
        assert_eq!(s.pending_len(), 2);
    }
}
