//! Ephemeral id → backend id mapping.
//!
//! Entries only come from server-confirmed data and are never cleared or
//! overwritten, so a lookup hit always means the annotation exists
//! server-side.

use std::collections::HashMap;

use crate::types::{BackendId, EphemeralId};

/// Outcome of [`IdentityMap::confirm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    /// Same mapping was already present.
    Unchanged,
    /// A different backend id is already mapped; the existing one is kept.
    Conflict { existing: BackendId },
}

#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    entries: HashMap<EphemeralId, BackendId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a confirmed identity.
    pub fn confirm(&mut self, ephemeral_id: EphemeralId, backend_id: BackendId) -> Registration {
        match self.entries.get(&ephemeral_id) {
            Some(&existing) if existing == backend_id => Registration::Unchanged,
            Some(&existing) => Registration::Conflict { existing },
            None => {
                self.entries.insert(ephemeral_id, backend_id);
                Registration::Inserted
            }
        }
    }

    pub fn get(&self, ephemeral_id: &EphemeralId) -> Option<BackendId> {
        self.entries.get(ephemeral_id).copied()
    }

    pub fn contains(&self, ephemeral_id: &EphemeralId) -> bool {
        self.entries.contains_key(ephemeral_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
