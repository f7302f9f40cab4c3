//! Identity → live session bindings.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use shared::{Identity, SessionId};

use super::SessionHandle;

/// Maps an identity to the session that most recently registered it.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<Identity, SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `identity` to `session`, replacing any earlier binding.
    /// Returns the session that held the identity before, if it was a different one.
    pub fn register(&self, identity: Identity, session: SessionHandle) -> Option<SessionId> {
        let new_id = session.id();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .insert(identity, session)
            .map(|prev| prev.id())
            .filter(|prev| *prev != new_id)
    }

    pub fn resolve(&self, identity: &Identity) -> Option<SessionHandle> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(identity).cloned()
    }

    /// Drop every binding that points at `session`. Returns how many were removed.
    pub fn remove(&self, session: SessionId) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, handle| handle.id() != session);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
