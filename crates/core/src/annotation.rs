//! Annotation records held in the working set, and their conversion from
//! and to the remote wire format.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::geometry::{Geometry, GeometryKind};
use crate::lifecycle::SyncState;
use crate::remote::RemoteAnnotation;
use crate::types::{BackendId, EphemeralId, ImageId, LabelId, Timestamp};

/// Attribute key older servers use to echo the creating client's id.
pub const EPHEMERAL_ID_ATTRIBUTE: &str = "client_annotation_id";

pub type Attributes = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub ephemeral_id: EphemeralId,
    /// Set once a load has returned the server copy.
    pub backend_id: Option<BackendId>,
    /// Always a primary image id.
    pub image_id: ImageId,
    pub label_id: LabelId,
    pub geometry: Geometry,
    pub attributes: Attributes,
    pub visible: bool,
    pub sync_state: SyncState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A new annotation as drawn by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationDraft {
    /// Caller-chosen id; a random one is minted when absent.
    pub ephemeral_id: Option<EphemeralId>,
    pub image_id: ImageId,
    pub label_id: LabelId,
    pub geometry: Geometry,
    pub attributes: Attributes,
}

impl AnnotationDraft {
    pub fn new(image_id: ImageId, label_id: LabelId, geometry: Geometry) -> Self {
        Self {
            ephemeral_id: None,
            image_id,
            label_id,
            geometry,
            attributes: Attributes::new(),
        }
    }

    pub fn with_id(mut self, ephemeral_id: EphemeralId) -> Self {
        self.ephemeral_id = Some(ephemeral_id);
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A partial edit (drag, resize, relabel, attribute change).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationChange {
    pub label_id: Option<LabelId>,
    pub geometry: Option<Geometry>,
    pub attributes: Option<Attributes>,
}

impl AnnotationChange {
    pub fn geometry(geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            ..Self::default()
        }
    }

    pub fn label(label_id: LabelId) -> Self {
        Self {
            label_id: Some(label_id),
            ..Self::default()
        }
    }

    pub fn attributes(attributes: Attributes) -> Self {
        Self {
            attributes: Some(attributes),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.label_id.is_none() && self.geometry.is_none() && self.attributes.is_none()
    }
}

/// Everything the server needs to create or update an annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPayload {
    /// Echoed back by the server so a later load can recover the identity.
    pub client_annotation_id: EphemeralId,
    pub label_id: LabelId,
    pub geometry: Geometry,
    pub attributes: Attributes,
    pub image_width: u32,
    pub image_height: u32,
}

/// Result of converting one server record.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvertedAnnotation {
    pub record: AnnotationRecord,
    /// Present when the record carried a client marker, i.e. it was created
    /// by this client and has now round-tripped.
    pub confirmed_identity: Option<(EphemeralId, BackendId)>,
}

impl AnnotationRecord {
    /// Build a record from a draft, validating its geometry.
    pub fn from_draft(
        draft: AnnotationDraft,
        sync_state: SyncState,
        now: Timestamp,
    ) -> Result<Self, CoreError> {
        draft.geometry.validate()?;
        Ok(Self {
            ephemeral_id: draft.ephemeral_id.unwrap_or_else(EphemeralId::generate),
            backend_id: None,
            image_id: draft.image_id,
            label_id: draft.label_id,
            geometry: draft.geometry,
            attributes: draft.attributes,
            visible: true,
            sync_state,
            created_at: now,
            updated_at: now,
        })
    }

    /// Convert a server record fetched from the `kind` collection.
    ///
    /// `image_id` is the primary id the record's job image maps to. The
    /// legacy marker attribute is stripped so it never leaks into local
    /// content comparisons.
    pub fn from_remote(
        remote: RemoteAnnotation,
        kind: GeometryKind,
        image_id: ImageId,
        now: Timestamp,
    ) -> Result<ConvertedAnnotation, CoreError> {
        if remote.geometry.kind() != kind {
            return Err(CoreError::Validation(format!(
                "annotation {} in the {} collection has {} geometry",
                remote.id,
                kind.collection(),
                remote.geometry.kind().as_str()
            )));
        }

        let mut attributes = remote.attributes;
        let legacy_marker = attributes
            .remove(EPHEMERAL_ID_ATTRIBUTE)
            .and_then(|value| value.as_str().map(EphemeralId::new));
        let marker = remote.client_annotation_id.or(legacy_marker);

        let ephemeral_id = marker
            .clone()
            .unwrap_or_else(|| EphemeralId::for_backend(remote.id));
        let created_at = remote.created_at.unwrap_or(now);

        Ok(ConvertedAnnotation {
            record: Self {
                ephemeral_id,
                backend_id: Some(remote.id),
                image_id,
                label_id: remote.label_id,
                geometry: remote.geometry,
                attributes,
                visible: true,
                sync_state: SyncState::Synced,
                created_at,
                updated_at: remote.updated_at.unwrap_or(created_at),
            },
            confirmed_identity: marker.map(|id| (id, remote.id)),
        })
    }

    /// Apply a partial edit. The geometry kind of a record is fixed.
    pub fn apply_change(&mut self, change: &AnnotationChange, now: Timestamp) -> Result<(), CoreError> {
        if let Some(geometry) = &change.geometry {
            if geometry.kind() != self.geometry.kind() {
                return Err(CoreError::Validation(format!(
                    "cannot change a {} annotation into a {}",
                    self.geometry.kind().as_str(),
                    geometry.kind().as_str()
                )));
            }
            geometry.validate()?;
        }

        if let Some(label_id) = change.label_id {
            self.label_id = label_id;
        }
        if let Some(geometry) = &change.geometry {
            self.geometry = geometry.clone();
        }
        if let Some(attributes) = &change.attributes {
            self.attributes = attributes.clone();
        }
        self.updated_at = now;
        Ok(())
    }

    /// `true` when label, geometry and attributes are identical.
    pub fn same_content(&self, other: &Self) -> bool {
        self.label_id == other.label_id
            && self.geometry == other.geometry
            && self.attributes == other.attributes
    }

    pub fn payload(&self, image_width: u32, image_height: u32) -> AnnotationPayload {
        AnnotationPayload {
            client_annotation_id: self.ephemeral_id.clone(),
            label_id: self.label_id,
            geometry: self.geometry.clone(),
            attributes: self.attributes.clone(),
            image_width,
            image_height,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
