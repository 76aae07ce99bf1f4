//! Per-annotation synchronization state machine.
//!
//! Every record in the working set (and every tombstone) carries a
//! [`SyncState`]. Local edits, server confirmations seen on reload, and
//! completed sync cycles move it through the table in [`SyncState::apply`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Where an annotation stands relative to the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Exists only in a local-only workspace; never synchronized.
    LocalOnly,
    /// Created locally; the create is queued and no backend id is known yet.
    CreatePending,
    /// Matches the last server copy.
    Synced,
    /// Has a backend id and local edits that are queued as updates.
    UpdatePending,
    /// Deleted locally; a delete keyed by backend id is queued.
    DeletePending,
    /// Deleted locally with nothing queued for it.
    Tombstoned,
}

/// Inputs that drive [`SyncState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A local edit (geometry, label, attributes).
    Edit,
    /// A local delete.
    Delete,
    /// A (re)load returned the server copy of this annotation.
    Confirmed,
    /// The scheduler finished a cycle with nothing left pending.
    Flushed,
}

impl SyncState {
    /// Initial state of a locally created record.
    pub fn for_new_record(remote_backed: bool) -> Self {
        if remote_backed {
            Self::CreatePending
        } else {
            Self::LocalOnly
        }
    }

    /// Next state for `event`, or `None` when the transition is not allowed.
    pub fn next(self, event: SyncEvent) -> Option<Self> {
        use SyncEvent::*;
        use SyncState::*;

        match (self, event) {
            (LocalOnly, Edit) => Some(LocalOnly),
            (LocalOnly, Delete) => Some(Tombstoned),
            (LocalOnly, Confirmed) => None,
            (LocalOnly, Flushed) => Some(LocalOnly),

            (CreatePending, Edit) => Some(CreatePending),
            (CreatePending, Delete) => Some(Tombstoned),
            (CreatePending, Confirmed) => Some(Synced),
            (CreatePending, Flushed) => Some(CreatePending),

            (Synced, Edit) => Some(UpdatePending),
            (Synced, Delete) => Some(DeletePending),
            (Synced, Confirmed) => Some(Synced),
            (Synced, Flushed) => Some(Synced),

            (UpdatePending, Edit) => Some(UpdatePending),
            (UpdatePending, Delete) => Some(DeletePending),
            (UpdatePending, Confirmed) => Some(UpdatePending),
            (UpdatePending, Flushed) => Some(Synced),

            (DeletePending, Edit) => None,
            (DeletePending, Delete) => Some(DeletePending),
            (DeletePending, Confirmed) => Some(DeletePending),
            (DeletePending, Flushed) => Some(Tombstoned),

            (Tombstoned, Edit) => None,
            (Tombstoned, Delete) => Some(Tombstoned),
            // The server revealed a create that was dispatched before the
            // local delete could retract it.
            (Tombstoned, Confirmed) => Some(DeletePending),
            (Tombstoned, Flushed) => Some(Tombstoned),
        }
    }

    /// Apply `event`, rejecting transitions outside the table.
    pub fn apply(self, event: SyncEvent) -> Result<Self, CoreError> {
        self.next(event).ok_or_else(|| {
            CoreError::Conflict(format!(
                "invalid sync transition: {} on {event:?}",
                self.as_str()
            ))
        })
    }

    /// `true` while local changes are waiting to reach the server.
    pub fn has_local_changes(self) -> bool {
        matches!(
            self,
            Self::CreatePending | Self::UpdatePending | Self::DeletePending
        )
    }

    /// `true` for states that only tombstones can be in.
    pub fn is_deleted(self) -> bool {
        matches!(self, Self::DeletePending | Self::Tombstoned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalOnly => "local_only",
            Self::CreatePending => "create_pending",
            Self::Synced => "synced",
            Self::UpdatePending => "update_pending",
            Self::DeletePending => "delete_pending",
            Self::Tombstoned => "tombstoned",
        }
    }
}
