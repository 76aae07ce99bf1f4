//! Wire types exchanged with the remote job and annotation services.

use serde::{Deserialize, Serialize};

use crate::geometry::{Geometry, GeometryKind};
use crate::types::{BackendId, EphemeralId, JobId, JobImageId, LabelId, Timestamp};

/// Default page size for job image listings.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    InProgress,
    Completed,
    Archived,
}

impl JobStatus {
    /// Jobs are transitioned to started the first time they are opened.
    pub fn needs_start(self) -> bool {
        self == Self::New
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
}

/// One image as listed by a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobImage {
    pub id: JobImageId,
    /// Id unifying the same physical image across jobs, when the server
    /// tracks one.
    #[serde(default)]
    pub shared_image_id: Option<i64>,
    pub width: u32,
    pub height: u32,
    pub storage_key: String,
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn first(page_size: u32) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
        }
    }

    pub fn next(self) -> Self {
        Self {
            page: self.page + 1,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page: Option<u32>,
}

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// An annotation as stored by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteAnnotation {
    pub id: BackendId,
    pub image_id: JobImageId,
    pub label_id: LabelId,
    pub geometry: Geometry,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
    /// Ephemeral id of the client that created the record, echoed back.
    #[serde(default)]
    pub client_annotation_id: Option<EphemeralId>,
    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

/// Both geometry collections of one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageAnnotations {
    #[serde(default)]
    pub detections: Vec<RemoteAnnotation>,
    #[serde(default)]
    pub segmentations: Vec<RemoteAnnotation>,
}

impl ImageAnnotations {
    pub fn len(&self) -> usize {
        self.detections.len() + self.segmentations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate every record together with the collection it came from.
    pub fn iter(&self) -> impl Iterator<Item = (GeometryKind, &RemoteAnnotation)> {
        self.detections
            .iter()
            .map(|a| (GeometryKind::Detection, a))
            .chain(
                self.segmentations
                    .iter()
                    .map(|a| (GeometryKind::Segmentation, a)),
            )
    }
}
