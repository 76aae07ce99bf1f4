//! The in-memory annotation working set of one workspace.
//!
//! Records are keyed by ephemeral id. Server data is merged one image at a
//! time; the merge consults each local record's [`SyncState`] so queued
//! local changes survive a reload and deleted records are never
//! resurrected.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::annotation::AnnotationRecord;
use crate::geometry::GeometryKind;
use crate::lifecycle::{SyncEvent, SyncState};
use crate::types::{BackendId, EphemeralId, ImageId};

/// Remembered local deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub image_id: ImageId,
    pub kind: GeometryKind,
    /// Known when the delete was sent, or once a reload revealed it.
    pub backend_id: Option<BackendId>,
    /// `DeletePending` or `Tombstoned`.
    pub state: SyncState,
}

/// Work a merge leaves for the caller to hand to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FollowUp {
    /// A confirmed create: any create still queued for it is obsolete.
    RetractCreate { ephemeral_id: EphemeralId },
    /// A confirmed create whose local content moved on since it was sent.
    Update { ephemeral_id: EphemeralId },
    /// A tombstoned annotation turned out to exist server-side.
    Delete {
        backend_id: BackendId,
        kind: GeometryKind,
    },
}

/// What a merge changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Inserted or replaced records, in their merged form.
    pub upserted: Vec<AnnotationRecord>,
    /// Records dropped because the server no longer has them.
    pub removed: Vec<EphemeralId>,
    pub follow_ups: Vec<FollowUp>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    records: BTreeMap<EphemeralId, AnnotationRecord>,
    tombstones: HashMap<EphemeralId, Tombstone>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &EphemeralId) -> Option<&AnnotationRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &EphemeralId) -> Option<&mut AnnotationRecord> {
        self.records.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotationRecord> {
        self.records.values()
    }

    pub fn for_image(&self, image_id: ImageId) -> impl Iterator<Item = &AnnotationRecord> {
        self.records
            .values()
            .filter(move |record| record.image_id == image_id)
    }

    pub fn insert(&mut self, record: AnnotationRecord) -> Option<AnnotationRecord> {
        self.records.insert(record.ephemeral_id.clone(), record)
    }

    pub fn remove(&mut self, id: &EphemeralId) -> Option<AnnotationRecord> {
        self.records.remove(id)
    }

    pub fn tombstone(&self, id: &EphemeralId) -> Option<&Tombstone> {
        self.tombstones.get(id)
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Remember that `record` was deleted locally.
    pub fn add_tombstone(&mut self, record: &AnnotationRecord, backend_id: Option<BackendId>, state: SyncState) {
        self.tombstones.insert(
            record.ephemeral_id.clone(),
            Tombstone {
                image_id: record.image_id,
                kind: record.geometry.kind(),
                backend_id,
                state,
            },
        );
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.tombstones.clear();
    }

    /// Drop records and tombstones of every image `keep` rejects. Returns
    /// the ids of the dropped records.
    pub fn retain_images(&mut self, keep: impl Fn(ImageId) -> bool) -> Vec<EphemeralId> {
        let dropped: Vec<EphemeralId> = self
            .records
            .values()
            .filter(|record| !keep(record.image_id))
            .map(|record| record.ephemeral_id.clone())
            .collect();
        for id in &dropped {
            self.records.remove(id);
        }
        self.tombstones.retain(|_, tombstone| keep(tombstone.image_id));
        dropped
    }

    /// Merge the full server state of one image.
    ///
    /// `incoming` must already be converted and expressed in primary ids.
    pub fn merge_image(&mut self, image_id: ImageId, incoming: Vec<AnnotationRecord>) -> MergeReport {
        let mut report = MergeReport::default();
        let mut seen = HashSet::with_capacity(incoming.len());

        for mut server in incoming {
            let id = server.ephemeral_id.clone();
            seen.insert(id.clone());

            if let Some(tombstone) = self.tombstones.get_mut(&id) {
                if let (None, Some(backend_id)) = (tombstone.backend_id, server.backend_id) {
                    tombstone.backend_id = Some(backend_id);
                    tombstone.state = tombstone
                        .state
                        .next(SyncEvent::Confirmed)
                        .unwrap_or(tombstone.state);
                    report.follow_ups.push(FollowUp::Delete {
                        backend_id,
                        kind: tombstone.kind,
                    });
                }
                continue;
            }

            let Some(local) = self.records.get_mut(&id) else {
                report.upserted.push(server.clone());
                self.records.insert(id, server);
                continue;
            };

            match local.sync_state {
                SyncState::Synced => {
                    server.visible = local.visible;
                    *local = server;
                    report.upserted.push(local.clone());
                }
                SyncState::CreatePending => {
                    local.backend_id = server.backend_id;
                    let confirmed = local
                        .sync_state
                        .next(SyncEvent::Confirmed)
                        .unwrap_or(SyncState::Synced);
                    report.follow_ups.push(FollowUp::RetractCreate {
                        ephemeral_id: id.clone(),
                    });
                    if local.same_content(&server) {
                        local.sync_state = confirmed;
                    } else {
                        local.sync_state = confirmed.next(SyncEvent::Edit).unwrap_or(confirmed);
                        report.follow_ups.push(FollowUp::Update {
                            ephemeral_id: id.clone(),
                        });
                    }
                    report.upserted.push(local.clone());
                }
                SyncState::UpdatePending => {
                    if local.backend_id.is_none() {
                        local.backend_id = server.backend_id;
                        report.upserted.push(local.clone());
                    }
                }
                SyncState::LocalOnly | SyncState::DeletePending | SyncState::Tombstoned => {}
            }
        }

        let stale: Vec<EphemeralId> = self
            .records
            .values()
            .filter(|record| {
                record.image_id == image_id
                    && record.sync_state == SyncState::Synced
                    && !seen.contains(&record.ephemeral_id)
            })
            .map(|record| record.ephemeral_id.clone())
            .collect();
        for id in stale {
            self.records.remove(&id);
            report.removed.push(id);
        }

        report
    }

    /// Apply a completed sync cycle with nothing left pending.
    ///
    /// Queued updates are now on the server, and deletes sent by backend id
    /// no longer need their tombstone. Returns the records whose state
    /// changed.
    pub fn flush(&mut self) -> Vec<AnnotationRecord> {
        let mut changed = Vec::new();
        for record in self.records.values_mut() {
            if record.sync_state == SyncState::UpdatePending {
                record.sync_state = record
                    .sync_state
                    .next(SyncEvent::Flushed)
                    .unwrap_or(SyncState::Synced);
                changed.push(record.clone());
            }
        }
        self.tombstones
            .retain(|_, tombstone| tombstone.backend_id.is_none());
        changed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
