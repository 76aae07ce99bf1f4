//! Mutation classification.
//!
//! Decides, for each local edit in isolation, whether it targets an
//! annotation that already exists server-side. The decision is a pure
//! function of the record, the identity map, and the edit kind.

use serde::{Deserialize, Serialize};

use crate::annotation::{AnnotationPayload, AnnotationRecord};
use crate::geometry::GeometryKind;
use crate::identity::IdentityMap;
use crate::image::ImageRecord;
use crate::types::{BackendId, EphemeralId, JobImageId};

/// Server identity of an annotation as known to this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnnotationRef {
    /// Not confirmed by the server yet.
    Pending { ephemeral_id: EphemeralId },
    Persisted { backend_id: BackendId },
}

/// Resolve a record's identity: its own backend id first, then the
/// identity map.
pub fn resolve_ref(record: &AnnotationRecord, identities: &IdentityMap) -> AnnotationRef {
    match record
        .backend_id
        .or_else(|| identities.get(&record.ephemeral_id))
    {
        Some(backend_id) => AnnotationRef::Persisted { backend_id },
        None => AnnotationRef::Pending {
            ephemeral_id: record.ephemeral_id.clone(),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Create,
    Update,
    Delete,
}

/// Operation handed to the sync scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SyncOperation {
    /// Replaces any still-pending create for the same ephemeral id.
    Create {
        ephemeral_id: EphemeralId,
        job_image_id: JobImageId,
        payload: AnnotationPayload,
    },
    Update {
        backend_id: BackendId,
        job_image_id: JobImageId,
        payload: AnnotationPayload,
    },
    Delete {
        backend_id: BackendId,
        kind: GeometryKind,
    },
}

impl SyncOperation {
    pub fn kind(&self) -> GeometryKind {
        match self {
            Self::Create { payload, .. } | Self::Update { payload, .. } => payload.geometry.kind(),
            Self::Delete { kind, .. } => *kind,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Enqueue(SyncOperation),
    /// The annotation never reached the server: withdraw its pending create
    /// and send nothing.
    Retract { ephemeral_id: EphemeralId },
}

impl Classification {
    pub fn operation(&self) -> Option<&SyncOperation> {
        match self {
            Self::Enqueue(op) => Some(op),
            Self::Retract { .. } => None,
        }
    }
}

/// Classify one local edit of `record`, which lives on `image`.
pub fn classify(
    edit: EditKind,
    record: &AnnotationRecord,
    image: &ImageRecord,
    identities: &IdentityMap,
) -> Classification {
    let create = || {
        Classification::Enqueue(SyncOperation::Create {
            ephemeral_id: record.ephemeral_id.clone(),
            job_image_id: image.job_image_id,
            payload: record.payload(image.width, image.height),
        })
    };

    match (edit, resolve_ref(record, identities)) {
        (EditKind::Create, _) => create(),
        // Edited before its create was acknowledged: re-issue the create
        // with the latest content.
        (EditKind::Update, AnnotationRef::Pending { .. }) => create(),
        (EditKind::Update, AnnotationRef::Persisted { backend_id }) => {
            Classification::Enqueue(SyncOperation::Update {
                backend_id,
                job_image_id: image.job_image_id,
                payload: record.payload(image.width, image.height),
            })
        }
        (EditKind::Delete, AnnotationRef::Pending { ephemeral_id }) => {
            Classification::Retract { ephemeral_id }
        }
        (EditKind::Delete, AnnotationRef::Persisted { backend_id }) => {
            Classification::Enqueue(SyncOperation::Delete {
                backend_id,
                kind: record.geometry.kind(),
            })
        }
    }
}

/// Classify each record of a bulk edit independently.
pub fn classify_many<'a>(
    edit: EditKind,
    records: impl IntoIterator<Item = (&'a AnnotationRecord, &'a ImageRecord)>,
    identities: &IdentityMap,
) -> Vec<Classification> {
    records
        .into_iter()
        .map(|(record, image)| classify(edit, record, image, identities))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
