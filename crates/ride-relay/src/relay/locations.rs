//! Last-known positions, in memory only.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use shared::{LocationKey, LocationSnapshotEntry, SessionId};

#[derive(Debug, Clone, Copy)]
struct Fix {
    latitude: Option<f64>,
    longitude: Option<f64>,
    owner: SessionId,
}

/// One position per key, last write wins.
#[derive(Default)]
pub struct LocationStore {
    entries: RwLock<HashMap<LocationKey, Fix>>,
}

impl LocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(
        &self,
        key: LocationKey,
        latitude: Option<f64>,
        longitude: Option<f64>,
        owner: SessionId,
    ) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key,
            Fix {
                latitude,
                longitude,
                owner,
            },
        );
    }

    /// Point-in-time copy of every entry.
    pub fn snapshot(&self) -> Vec<LocationSnapshotEntry> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .map(|(key, fix)| LocationSnapshotEntry {
                key: key.clone(),
                latitude: fix.latitude,
                longitude: fix.longitude,
            })
            .collect()
    }

    pub fn remove(&self, key: &LocationKey) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).is_some()
    }

    /// Remove every entry last written by `session`.
    pub fn remove_owned_by(&self, session: SessionId) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, fix| fix.owner != session);
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
