//! Local edits of a workspace.
//!
//! Every edit updates the working set and, in job mode, hands the
//! classified operation to the scheduler under the same state lock, before
//! any network round trip. The local store is written afterwards; its
//! failures are reported but never undo the edit.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use labelsync_core::annotation::{AnnotationChange, AnnotationDraft, AnnotationRecord};
use labelsync_core::classifier::{classify, Classification, EditKind, SyncOperation};
use labelsync_core::error::CoreError;
use labelsync_core::image::ImageRecord;
use labelsync_core::lifecycle::{SyncEvent, SyncState};
use labelsync_core::types::EphemeralId;

use crate::error::EngineError;
use crate::state::WorkspaceState;
use crate::workspace::{Mode, Workspace};

impl Workspace {
    // -- create -------------------------------------------------------------

    pub async fn create_annotation(&self, draft: AnnotationDraft) -> Result<AnnotationRecord, EngineError> {
        let record = {
            let mut guard = self.ctx.state.write().await;
            let state = &mut *guard;
            let image = state
                .manifest
                .get(draft.image_id)
                .cloned()
                .ok_or(EngineError::UnknownImage(draft.image_id))?;
            let record = self.new_record(state, draft, &[])?;
            self.enqueue(state, EditKind::Create, &record, &image);
            state.working_set.insert(record.clone());
            record
        };

        if let Err(e) = self.ctx.store.add(&record).await {
            self.ctx.store_failed(e.to_string());
        }
        Ok(record)
    }

    /// Create several annotations. Drafts for unknown images are skipped; an
    /// invalid draft rejects the whole batch.
    pub async fn create_annotations(
        &self,
        drafts: Vec<AnnotationDraft>,
    ) -> Result<Vec<AnnotationRecord>, EngineError> {
        let records = {
            let mut guard = self.ctx.state.write().await;
            let state = &mut *guard;

            let mut prepared: Vec<(AnnotationRecord, ImageRecord)> = Vec::with_capacity(drafts.len());
            for draft in drafts {
                let Some(image) = state.manifest.get(draft.image_id).cloned() else {
                    tracing::warn!(image_id = draft.image_id.0, "Skipping annotation for unknown image");
                    continue;
                };
                let record = self.new_record(state, draft, &prepared)?;
                prepared.push((record, image));
            }

            for (record, image) in &prepared {
                self.enqueue(state, EditKind::Create, record, image);
                state.working_set.insert(record.clone());
            }
            prepared.into_iter().map(|(record, _)| record).collect::<Vec<_>>()
        };

        if !records.is_empty() {
            if let Err(e) = self.ctx.store.add_many(&records).await {
                self.ctx.store_failed(e.to_string());
            }
        }
        Ok(records)
    }

    fn new_record(
        &self,
        state: &WorkspaceState,
        draft: AnnotationDraft,
        batch: &[(AnnotationRecord, ImageRecord)],
    ) -> Result<AnnotationRecord, EngineError> {
        let initial = SyncState::for_new_record(self.mode() == Mode::Job);
        let record = AnnotationRecord::from_draft(draft, initial, Utc::now())?;
        let id = &record.ephemeral_id;
        if state.working_set.get(id).is_some()
            || state.working_set.tombstone(id).is_some()
            || batch.iter().any(|(other, _)| &other.ephemeral_id == id)
        {
            return Err(CoreError::Conflict(format!("annotation {id} already exists")).into());
        }
        Ok(record)
    }

    // -- update -------------------------------------------------------------

    pub async fn update_annotation(
        &self,
        id: &EphemeralId,
        change: AnnotationChange,
    ) -> Result<AnnotationRecord, EngineError> {
        let record = {
            let mut guard = self.ctx.state.write().await;
            let state = &mut *guard;
            let current = state
                .working_set
                .get(id)
                .ok_or_else(|| EngineError::UnknownAnnotation(id.clone()))?;
            if change.is_empty() {
                return Ok(current.clone());
            }
            let image = state
                .manifest
                .get(current.image_id)
                .cloned()
                .ok_or(EngineError::UnknownImage(current.image_id))?;
            let updated = edited(current, &change)?;
            self.enqueue(state, EditKind::Update, &updated, &image);
            state.working_set.insert(updated.clone());
            updated
        };

        if let Err(e) = self.ctx.store.update(&record).await {
            self.ctx.store_failed(e.to_string());
        }
        Ok(record)
    }

    /// Apply several edits. Unknown ids are skipped; an invalid edit rejects
    /// the whole batch. Several changes to one id are applied in order and
    /// yield a single record and operation.
    pub async fn update_annotations(
        &self,
        changes: Vec<(EphemeralId, AnnotationChange)>,
    ) -> Result<Vec<AnnotationRecord>, EngineError> {
        let records = {
            let mut guard = self.ctx.state.write().await;
            let state = &mut *guard;

            let mut prepared: Vec<(AnnotationRecord, ImageRecord)> = Vec::with_capacity(changes.len());
            let mut positions: HashMap<&EphemeralId, usize> = HashMap::new();
            for (id, change) in &changes {
                if let Some(&at) = positions.get(id) {
                    prepared[at].0.apply_change(change, Utc::now())?;
                    continue;
                }
                let Some(current) = state.working_set.get(id) else {
                    tracing::warn!(ephemeral_id = %id, "Skipping update of unknown annotation");
                    continue;
                };
                if change.is_empty() {
                    continue;
                }
                let Some(image) = state.manifest.get(current.image_id).cloned() else {
                    continue;
                };
                positions.insert(id, prepared.len());
                prepared.push((edited(current, change)?, image));
            }

            for (record, image) in &prepared {
                self.enqueue(state, EditKind::Update, record, image);
                state.working_set.insert(record.clone());
            }
            prepared.into_iter().map(|(record, _)| record).collect::<Vec<_>>()
        };

        if !records.is_empty() {
            if let Err(e) = self.ctx.store.update_many(&records).await {
                self.ctx.store_failed(e.to_string());
            }
        }
        Ok(records)
    }

    /// Show or hide an annotation. Visibility is local and never synced.
    pub async fn set_visibility(&self, id: &EphemeralId, visible: bool) -> Result<AnnotationRecord, EngineError> {
        let record = {
            let mut state = self.ctx.state.write().await;
            let record = state
                .working_set
                .get_mut(id)
                .ok_or_else(|| EngineError::UnknownAnnotation(id.clone()))?;
            record.visible = visible;
            record.clone()
        };
        if let Err(e) = self.ctx.store.update(&record).await {
            self.ctx.store_failed(e.to_string());
        }
        Ok(record)
    }

    // -- delete -------------------------------------------------------------

    pub async fn delete_annotation(&self, id: &EphemeralId) -> Result<(), EngineError> {
        {
            let mut guard = self.ctx.state.write().await;
            let state = &mut *guard;
            if state.working_set.get(id).is_none() {
                return Err(EngineError::UnknownAnnotation(id.clone()));
            }
            self.delete_locked(state, id);
        }

        if let Err(e) = self.ctx.store.remove(id).await {
            self.ctx.store_failed(e.to_string());
        }
        Ok(())
    }

    /// Delete several annotations. Unknown ids are skipped.
    pub async fn delete_annotations(&self, ids: &[EphemeralId]) -> Result<usize, EngineError> {
        let removed = {
            let mut guard = self.ctx.state.write().await;
            let state = &mut *guard;
            let mut seen = HashSet::new();
            let mut removed = Vec::with_capacity(ids.len());
            for id in ids {
                if !seen.insert(id) {
                    continue;
                }
                if state.working_set.get(id).is_none() {
                    tracing::warn!(ephemeral_id = %id, "Skipping delete of unknown annotation");
                    continue;
                }
                self.delete_locked(state, id);
                removed.push(id.clone());
            }
            removed
        };

        if !removed.is_empty() {
            if let Err(e) = self.ctx.store.remove_many(&removed).await {
                self.ctx.store_failed(e.to_string());
            }
        }
        Ok(removed.len())
    }

    /// Remove `id` from the working set, queueing a delete or retracting its
    /// pending create. The caller checked that the record exists.
    fn delete_locked(&self, state: &mut WorkspaceState, id: &EphemeralId) {
        let Some(record) = state.working_set.remove(id) else {
            return;
        };
        if self.mode() == Mode::Solo {
            return;
        }
        let Some(image) = state.manifest.get(record.image_id) else {
            return;
        };

        match classify(EditKind::Delete, &record, image, &state.identities) {
            Classification::Enqueue(op) => {
                let backend_id = match &op {
                    SyncOperation::Delete { backend_id, .. } => Some(*backend_id),
                    _ => None,
                };
                tracing::debug!(ephemeral_id = %id, backend_id, "Queued delete");
                self.ctx.sync.enqueue(op);
                state
                    .working_set
                    .add_tombstone(&record, backend_id, SyncState::DeletePending);
            }
            Classification::Retract { ephemeral_id } => {
                let retracted = self.ctx.sync.retract_create(&ephemeral_id);
                tracing::debug!(ephemeral_id = %id, retracted, "Retracted pending create");
                // An earlier create may already be on its way; a later reload
                // turns this into a delete if the server reveals it.
                state
                    .working_set
                    .add_tombstone(&record, None, SyncState::Tombstoned);
            }
        }
    }

    fn enqueue(&self, state: &WorkspaceState, edit: EditKind, record: &AnnotationRecord, image: &ImageRecord) {
        if self.mode() == Mode::Solo {
            return;
        }
        match classify(edit, record, image, &state.identities) {
            Classification::Enqueue(op) => {
                tracing::debug!(
                    op = op.verb(),
                    ephemeral_id = %record.ephemeral_id,
                    image_id = record.image_id.0,
                    "Queued sync operation",
                );
                self.ctx.sync.enqueue(op);
            }
            Classification::Retract { .. } => {}
        }
    }
}

/// `record` with `change` applied and its sync state advanced.
fn edited(record: &AnnotationRecord, change: &AnnotationChange) -> Result<AnnotationRecord, EngineError> {
    let mut updated = record.clone();
    updated.apply_change(change, Utc::now())?;
    updated.sync_state = updated.sync_state.apply(SyncEvent::Edit)?;
    Ok(updated)
}
