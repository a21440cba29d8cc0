use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::Session;

/// A shared handle to one session. Holding the lock serializes control
/// requests for that session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Generate a session identifier: 64 random bits as 16 upper-case hex digits.
pub fn generate_session_id() -> String {
    format!("{:016X}", rand::random::<u64>())
}

/// Thread-safe registry of active sessions, keyed by session ID.
///
/// Backed by `parking_lot::RwLock`: lookups from concurrent control
/// connections share the read lock, insert and remove take it exclusively.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh ID and register the session `build` makes for it.
    ///
    /// ID generation and insertion happen under one write lock, so two
    /// concurrent SETUPs can never end up with the same ID.
    pub fn create(&self, build: impl FnOnce(String) -> Session) -> SessionHandle {
        let mut sessions = self.sessions.write();

        let mut id = generate_session_id();
        while sessions.contains_key(&id) {
            tracing::warn!(session_id = %id, "session id collision, regenerating");
            id = generate_session_id();
        }

        let session = Arc::new(Mutex::new(build(id.clone())));
        sessions.insert(id.clone(), session.clone());

        tracing::debug!(
            session_id = %id,
            total_sessions = sessions.len(),
            "session registered"
        );
        session
    }

    /// Look up a session by ID.
    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove and return a session by ID (used by TEARDOWN).
    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.write();
        let removed = sessions.remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, total_sessions = sessions.len(), "session removed");
        }
        removed
    }

    /// Remove sessions and stop their send loops (used on control
    /// connection loss). Returns how many were still registered.
    pub fn remove_many(&self, ids: &[String]) -> usize {
        let removed: Vec<SessionHandle> = {
            let mut sessions = self.sessions.write();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        // Loops are joined outside the registry lock so other connections
        // are not blocked while they wind down.
        for session in &removed {
            session.lock().shutdown();
        }

        if !removed.is_empty() {
            tracing::debug!(
                removed = removed.len(),
                remaining = self.len(),
                "batch session cleanup"
            );
        }
        removed.len()
    }

    /// Stop and drop every session (server shutdown).
    pub fn shutdown(&self) -> usize {
        let drained: Vec<SessionHandle> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.lock().shutdown();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
