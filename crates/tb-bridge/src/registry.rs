use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::session::{Session, SessionState};

/// Snapshot of one connected session, for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub state: SessionState,
    pub cols: u16,
    pub rows: u16,
    pub connected_at: DateTime<Utc>,
    pub spawn_count: u32,
}

impl SessionInfo {
    pub fn from_session(session: &Session, connected_at: DateTime<Utc>) -> Self {
        let size = session.pending_size();
        Self {
            id: session.id(),
            state: session.state(),
            cols: size.cols,
            rows: size.rows,
            connected_at,
            spawn_count: session.spawn_count(),
        }
    }
}

/// Live sessions keyed by connection. Entries are owned by the WebSocket
/// driver: inserted on open, refreshed on change, removed on close.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<Uuid, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: SessionInfo) {
        self.sessions.insert(info.id, info);
    }

    pub fn unregister(&mut self, id: &Uuid) -> Option<SessionInfo> {
        self.sessions.remove(id)
    }

    /// Refresh the entry for `session`. Returns false if it is not registered.
    pub fn update(&mut self, session: &Session) -> bool {
        match self.sessions.get_mut(&session.id()) {
            Some(info) => {
                *info = SessionInfo::from_session(session, info.connected_at);
                true
            }
            None => false,
        }
    }

    /// All sessions, oldest connection first.
    pub fn list(&self) -> Vec<&SessionInfo> {
        let mut all: Vec<&SessionInfo> = self.sessions.values().collect();
        all.sort_by_key(|info| info.connected_at);
        all
    }

    pub fn count_in(&self, state: SessionState) -> usize {
        self.sessions.values().filter(|s| s.state == state).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
