//! Interfaces the engine consumes.
//!
//! Transport, durable local storage, the batching/retry scheduler and the
//! settings backend all live outside the engine and are injected as trait
//! objects.

use std::sync::Arc;

use async_trait::async_trait;
use labelsync_core::annotation::AnnotationRecord;
use labelsync_core::classifier::SyncOperation;
use labelsync_core::remote::{ImageAnnotations, JobImage, JobSummary, Page, PageRequest};
use labelsync_core::settings::AutosaveSettings;
use labelsync_core::types::{EphemeralId, JobId, JobImageId, Timestamp};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Local store error: {0}")]
pub struct StoreError(pub String);

// ---------------------------------------------------------------------------
// Remote services
// ---------------------------------------------------------------------------

#[async_trait]
pub trait JobService: Send + Sync {
    async fn get_job(&self, job_id: JobId) -> Result<JobSummary, RemoteError>;

    /// Move a `new` job to `in_progress`.
    async fn start_job(&self, job_id: JobId) -> Result<(), RemoteError>;

    async fn list_job_images(
        &self,
        job_id: JobId,
        page: PageRequest,
    ) -> Result<Page<JobImage>, RemoteError>;
}

#[async_trait]
pub trait AnnotationSource: Send + Sync {
    /// Fetch both geometry collections of one job image.
    async fn fetch_annotations(
        &self,
        job_id: JobId,
        image_id: JobImageId,
    ) -> Result<ImageAnnotations, RemoteError>;
}

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

/// Durable local copy of the working set. Writes are upserts.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn add(&self, record: &AnnotationRecord) -> Result<(), StoreError>;
    async fn add_many(&self, records: &[AnnotationRecord]) -> Result<(), StoreError>;
    async fn update(&self, record: &AnnotationRecord) -> Result<(), StoreError>;
    async fn update_many(&self, records: &[AnnotationRecord]) -> Result<(), StoreError>;
    async fn remove(&self, id: &EphemeralId) -> Result<(), StoreError>;
    async fn remove_many(&self, ids: &[EphemeralId]) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// Sync scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub pending: usize,
    pub last_synced_at: Option<Timestamp>,
    pub online: bool,
}

/// Summary of one completed sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub completed_at: Timestamp,
    /// Operations still queued after the cycle.
    pub pending: usize,
}

pub type OnSynced = Arc<dyn Fn(SyncReport) + Send + Sync>;

/// Batches queued operations and sends them to the remote service.
#[async_trait]
pub trait SyncScheduler: Send + Sync {
    /// Queue an operation. A `Create` replaces any still-pending create for
    /// the same ephemeral id.
    fn enqueue(&self, op: SyncOperation);

    /// Withdraw a pending create. Returns `true` when one was removed before
    /// it was dispatched.
    fn retract_create(&self, ephemeral_id: &EphemeralId) -> bool;

    fn status(&self) -> SyncStatus;

    /// Run a cycle immediately.
    async fn sync_now(&self) -> Result<SyncReport, RemoteError>;

    fn set_autosave(&self, settings: AutosaveSettings);

    /// Register a callback invoked after every successful cycle.
    fn on_synced(&self, callback: OnSynced);
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Key/value preferences storage.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
