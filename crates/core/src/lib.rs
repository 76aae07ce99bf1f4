//! Domain logic of the labelsync annotation engine.
//!
//! Pure types and functions with no I/O:
//!
//! - [`image`]: image identity mapping (shared vs job-scoped ids).
//! - [`identity`]: confirmed ephemeral → backend annotation ids.
//! - [`lifecycle`]: per-annotation sync state machine.
//! - [`classifier`]: create/update/delete decisions for local edits.
//! - [`working_set`]: local records and the reload merge.
//! - [`progress`]: load phases and progress invariants.

pub mod annotation;
pub mod classifier;
pub mod error;
pub mod geometry;
pub mod identity;
pub mod image;
pub mod lifecycle;
pub mod progress;
pub mod remote;
pub mod settings;
pub mod types;
pub mod working_set;

pub use annotation::{AnnotationChange, AnnotationDraft, AnnotationPayload, AnnotationRecord};
pub use classifier::{classify, AnnotationRef, Classification, EditKind, SyncOperation};
pub use error::CoreError;
pub use geometry::{BoundingBox, Geometry, GeometryKind, Point, Polygon};
pub use identity::IdentityMap;
pub use image::{ImageManifest, ImageRecord, TargetSelector};
pub use lifecycle::{SyncEvent, SyncState};
pub use progress::{LoadPhase, LoadingProgress, ProgressTracker};
pub use settings::AutosaveSettings;
pub use types::{BackendId, EphemeralId, ImageId, JobId, JobImageId, LabelId, Timestamp};
pub use working_set::{FollowUp, MergeReport, WorkingSet};
