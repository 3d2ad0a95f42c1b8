//! # Connection Registry
//!
//! Book-keeping for live WebSocket sessions. A session is added when its
//! connection opens and removed when it closes; the health and metrics
//! endpoints read the count. Nothing is ever broadcast through it.
//!
//! ## Thread Safety:
//! One coarse `RwLock` around a `HashMap`, shared by cloning the registry.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// What we remember about a connected client.
#[derive(Debug, Clone)]
pub struct ConnectedSession {
    pub session_id: Uuid,
    /// Remote address as reported by the HTTP upgrade request
    pub peer_addr: Option<String>,
    pub connected_at: DateTime<Utc>,
}

/// Shared set of live sessions. Cloning shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, ConnectedSession>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly connected session and return the live count.
    pub fn add(&self, session_id: Uuid, peer_addr: Option<String>) -> usize {
        let mut sessions = self.write();
        sessions.insert(
            session_id,
            ConnectedSession {
                session_id,
                peer_addr,
                connected_at: Utc::now(),
            },
        );
        sessions.len()
    }

    /// Forget a session. Removing an unknown id is a no-op.
    ///
    /// Returns `true` if the session was present.
    pub fn remove(&self, session_id: &Uuid) -> bool {
        self.write().remove(session_id).is_some()
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Copy of all sessions, oldest first.
    pub fn snapshot(&self) -> Vec<ConnectedSession> {
        let mut sessions: Vec<ConnectedSession> = self.read().values().cloned().collect();
        sessions.sort_by_key(|s| s.connected_at);
        sessions
    }

    // No critical section can leave the map half-updated; poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, ConnectedSession>> {
        self.sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, ConnectedSession>> {
        self.sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
