//! Shared fakes and fixtures for the engine integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use labelsync_core::annotation::Attributes;
use labelsync_core::classifier::SyncOperation;
use labelsync_core::geometry::{BoundingBox, Geometry, GeometryKind};
use labelsync_core::progress::{LoadPhase, LoadingProgress};
use labelsync_core::remote::{
    ImageAnnotations, JobImage, JobStatus, JobSummary, Page, PageRequest, RemoteAnnotation,
};
use labelsync_core::settings::AutosaveSettings;
use labelsync_core::types::{BackendId, EphemeralId, JobId, JobImageId, Timestamp};
use labelsync_engine::{
    AnnotationSource, EngineConfig, JobService, LocalStore, MemoryStore, OnSynced, RemoteError,
    StoreError, SyncReport, SyncScheduler, SyncStatus, Workspace,
};
use labelsync_events::{EngineEvent, EventKind};
use tokio::sync::broadcast;

pub const JOB_ID: JobId = 7;

/// Shared ids are the job-scoped id plus this offset.
pub const SHARED_OFFSET: i64 = 100;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn bbox(x: f64) -> Geometry {
    Geometry::Detection(BoundingBox::new(x, 0.1, 0.1, 0.1))
}

/// `count` job images with ids `1..=count`, each with a shared id.
pub fn job_images(count: i64) -> Vec<JobImage> {
    (1..=count)
        .map(|id| JobImage {
            id: JobImageId(id),
            shared_image_id: Some(id + SHARED_OFFSET),
            width: 1000,
            height: 800,
            storage_key: format!("jobs/{JOB_ID}/{id}.jpg"),
        })
        .collect()
}

pub fn remote_box(id: BackendId, image: i64, x: f64, marker: Option<&str>) -> RemoteAnnotation {
    RemoteAnnotation {
        id,
        image_id: JobImageId(image),
        label_id: 1,
        geometry: bbox(x),
        attributes: Attributes::new(),
        client_annotation_id: marker.map(EphemeralId::new),
        created_at: None,
        updated_at: None,
    }
}

/// No artificial delays, so tests that do not measure timing finish fast.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        batch_delay: Duration::ZERO,
        background_start_delay: Duration::ZERO,
        ..EngineConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Job service
// ---------------------------------------------------------------------------

pub struct FakeJobs {
    jobs: Mutex<HashMap<JobId, (JobSummary, Vec<JobImage>)>>,
    pub fail_get: Mutex<bool>,
    pub fail_start: Mutex<bool>,
    pub started: AtomicUsize,
    pub pages_requested: AtomicUsize,
}

impl FakeJobs {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            fail_get: Mutex::new(false),
            fail_start: Mutex::new(false),
            started: AtomicUsize::new(0),
            pages_requested: AtomicUsize::new(0),
        }
    }

    pub fn with_job(self, job_id: JobId, status: JobStatus, images: Vec<JobImage>) -> Self {
        self.set_job(job_id, status, images);
        self
    }

    pub fn set_job(&self, job_id: JobId, status: JobStatus, images: Vec<JobImage>) {
        let summary = JobSummary {
            id: job_id,
            name: format!("job {job_id}"),
            status,
        };
        self.jobs.lock().unwrap().insert(job_id, (summary, images));
    }

    pub fn status(&self, job_id: JobId) -> JobStatus {
        self.jobs.lock().unwrap()[&job_id].0.status
    }
}

#[async_trait]
impl JobService for FakeJobs {
    async fn get_job(&self, job_id: JobId) -> Result<JobSummary, RemoteError> {
        if *self.fail_get.lock().unwrap() {
            return Err(RemoteError::Transport("connection refused".into()));
        }
        self.jobs
            .lock()
            .unwrap()
            .get(&job_id)
            .map(|(summary, _)| summary.clone())
            .ok_or(RemoteError::Status {
                status: 404,
                message: format!("job {job_id} not found"),
            })
    }

    async fn start_job(&self, job_id: JobId) -> Result<(), RemoteError> {
        if *self.fail_start.lock().unwrap() {
            return Err(RemoteError::Status {
                status: 403,
                message: "not allowed".into(),
            });
        }
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some((summary, _)) = self.jobs.lock().unwrap().get_mut(&job_id) {
            summary.status = JobStatus::InProgress;
        }
        Ok(())
    }

    async fn list_job_images(
        &self,
        job_id: JobId,
        page: PageRequest,
    ) -> Result<Page<JobImage>, RemoteError> {
        self.pages_requested.fetch_add(1, Ordering::SeqCst);
        let jobs = self.jobs.lock().unwrap();
        let (_, images) = jobs.get(&job_id).ok_or(RemoteError::Status {
            status: 404,
            message: format!("job {job_id} not found"),
        })?;
        let size = page.page_size as usize;
        let start = (page.page as usize - 1) * size;
        let items: Vec<JobImage> = images.iter().skip(start).take(size).cloned().collect();
        let next_page = (start + size < images.len()).then_some(page.page + 1);
        Ok(Page { items, next_page })
    }
}

// ---------------------------------------------------------------------------
// Annotation source (plays the server's annotation store)
// ---------------------------------------------------------------------------

pub struct FetchCall {
    pub image: JobImageId,
    pub at: tokio::time::Instant,
}

pub struct FakeSource {
    annotations: Mutex<HashMap<JobImageId, ImageAnnotations>>,
    failing: Mutex<HashSet<JobImageId>>,
    calls: Mutex<Vec<FetchCall>>,
    latency: Duration,
    next_id: AtomicI64,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            annotations: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            latency,
            next_id: AtomicI64::new(500),
        }
    }

    pub fn put(&self, annotation: RemoteAnnotation) {
        let mut all = self.annotations.lock().unwrap();
        let entry = all.entry(annotation.image_id).or_default();
        match annotation.geometry.kind() {
            GeometryKind::Detection => entry.detections.push(annotation),
            GeometryKind::Segmentation => entry.segmentations.push(annotation),
        }
    }

    /// Store `annotation` under `image` regardless of its own image id.
    pub fn put_under(&self, image: JobImageId, annotation: RemoteAnnotation) {
        self.annotations
            .lock()
            .unwrap()
            .entry(image)
            .or_default()
            .detections
            .push(annotation);
    }

    pub fn remove(&self, backend_id: BackendId) {
        for collections in self.annotations.lock().unwrap().values_mut() {
            collections.detections.retain(|a| a.id != backend_id);
            collections.segmentations.retain(|a| a.id != backend_id);
        }
    }

    pub fn find(&self, backend_id: BackendId) -> Option<RemoteAnnotation> {
        self.annotations
            .lock()
            .unwrap()
            .values()
            .flat_map(|c| c.detections.iter().chain(c.segmentations.iter()))
            .find(|a| a.id == backend_id)
            .cloned()
    }

    pub fn fail(&self, image: JobImageId) {
        self.failing.lock().unwrap().insert(image);
    }

    pub fn recover(&self, image: JobImageId) {
        self.failing.lock().unwrap().remove(&image);
    }

    pub fn calls(&self) -> Vec<JobImageId> {
        self.calls.lock().unwrap().iter().map(|c| c.image).collect()
    }

    pub fn call_times(&self) -> Vec<(JobImageId, tokio::time::Instant)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| (c.image, c.at))
            .collect()
    }

    /// Persist a dispatched operation the way the server would. Returns the
    /// backend id of a created annotation.
    pub fn persist(&self, op: &SyncOperation) -> Option<BackendId> {
        match op {
            SyncOperation::Create {
                job_image_id,
                payload,
                ..
            } => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.put(RemoteAnnotation {
                    id,
                    image_id: *job_image_id,
                    label_id: payload.label_id,
                    geometry: payload.geometry.clone(),
                    attributes: payload.attributes.clone(),
                    client_annotation_id: Some(payload.client_annotation_id.clone()),
                    created_at: Some(Utc::now()),
                    updated_at: None,
                });
                Some(id)
            }
            SyncOperation::Update {
                backend_id,
                payload,
                ..
            } => {
                let mut all = self.annotations.lock().unwrap();
                for collections in all.values_mut() {
                    for a in collections
                        .detections
                        .iter_mut()
                        .chain(collections.segmentations.iter_mut())
                    {
                        if a.id == *backend_id {
                            a.label_id = payload.label_id;
                            a.geometry = payload.geometry.clone();
                            a.attributes = payload.attributes.clone();
                        }
                    }
                }
                None
            }
            SyncOperation::Delete { backend_id, .. } => {
                self.remove(*backend_id);
                None
            }
        }
    }
}

#[async_trait]
impl AnnotationSource for FakeSource {
    async fn fetch_annotations(
        &self,
        _job_id: JobId,
        image_id: JobImageId,
    ) -> Result<ImageAnnotations, RemoteError> {
        self.calls.lock().unwrap().push(FetchCall {
            image: image_id,
            at: tokio::time::Instant::now(),
        });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.lock().unwrap().contains(&image_id) {
            return Err(RemoteError::Status {
                status: 503,
                message: "unavailable".into(),
            });
        }
        Ok(self
            .annotations
            .lock()
            .unwrap()
            .get(&image_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Sync scheduler
// ---------------------------------------------------------------------------

/// Queue that coalesces creates per ephemeral id and dispatches on demand.
#[derive(Default)]
pub struct RecordingScheduler {
    queue: Mutex<Vec<SyncOperation>>,
    callbacks: Mutex<Vec<OnSynced>>,
    last_synced_at: Mutex<Option<Timestamp>>,
    pub autosave: Mutex<Option<AutosaveSettings>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<SyncOperation> {
        self.queue.lock().unwrap().clone()
    }

    /// Hand every queued operation to the "network".
    pub fn dispatch(&self) -> Vec<SyncOperation> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }

    /// Report a finished cycle to the registered callbacks.
    pub fn complete_cycle(&self) -> SyncReport {
        let now = Utc::now();
        *self.last_synced_at.lock().unwrap() = Some(now);
        let report = SyncReport {
            completed_at: now,
            pending: self.queue.lock().unwrap().len(),
        };
        let callbacks = self.callbacks.lock().unwrap().clone();
        for callback in callbacks {
            callback(report);
        }
        report
    }
}

#[async_trait]
impl SyncScheduler for RecordingScheduler {
    fn enqueue(&self, op: SyncOperation) {
        let mut queue = self.queue.lock().unwrap();
        if let SyncOperation::Create { ephemeral_id, .. } = &op {
            let existing = queue.iter_mut().find(|queued| {
                matches!(queued, SyncOperation::Create { ephemeral_id: id, .. } if id == ephemeral_id)
            });
            if let Some(existing) = existing {
                *existing = op;
                return;
            }
        }
        queue.push(op);
    }

    fn retract_create(&self, ephemeral_id: &EphemeralId) -> bool {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.len();
        queue.retain(|op| {
            !matches!(op, SyncOperation::Create { ephemeral_id: id, .. } if id == ephemeral_id)
        });
        queue.len() != before
    }

    fn status(&self) -> SyncStatus {
        SyncStatus {
            pending: self.queue.lock().unwrap().len(),
            last_synced_at: *self.last_synced_at.lock().unwrap(),
            online: true,
        }
    }

    async fn sync_now(&self) -> Result<SyncReport, RemoteError> {
        self.dispatch();
        Ok(self.complete_cycle())
    }

    fn set_autosave(&self, settings: AutosaveSettings) {
        *self.autosave.lock().unwrap() = Some(settings);
    }

    fn on_synced(&self, callback: OnSynced) {
        self.callbacks.lock().unwrap().push(callback);
    }
}

// ---------------------------------------------------------------------------
// Local store that rejects every write
// ---------------------------------------------------------------------------

pub struct BrokenStore;

#[async_trait]
impl LocalStore for BrokenStore {
    async fn add(&self, _: &labelsync_core::AnnotationRecord) -> Result<(), StoreError> {
        Err(StoreError("quota exceeded".into()))
    }
    async fn add_many(&self, _: &[labelsync_core::AnnotationRecord]) -> Result<(), StoreError> {
        Err(StoreError("quota exceeded".into()))
    }
    async fn update(&self, _: &labelsync_core::AnnotationRecord) -> Result<(), StoreError> {
        Err(StoreError("quota exceeded".into()))
    }
    async fn update_many(&self, _: &[labelsync_core::AnnotationRecord]) -> Result<(), StoreError> {
        Err(StoreError("quota exceeded".into()))
    }
    async fn remove(&self, _: &EphemeralId) -> Result<(), StoreError> {
        Err(StoreError("quota exceeded".into()))
    }
    async fn remove_many(&self, _: &[EphemeralId]) -> Result<(), StoreError> {
        Err(StoreError("quota exceeded".into()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub workspace: Workspace,
    pub jobs: Arc<FakeJobs>,
    pub source: Arc<FakeSource>,
    pub sync: Arc<RecordingScheduler>,
    pub store: Arc<MemoryStore>,
    pub events: broadcast::Receiver<EngineEvent>,
}

impl Harness {
    /// Job-mode workspace over `images` job images, with no pipeline delays.
    pub fn new(images: i64) -> Self {
        Self::with(
            Arc::new(FakeJobs::new().with_job(JOB_ID, JobStatus::InProgress, job_images(images))),
            Arc::new(FakeSource::new()),
            fast_config(),
        )
    }

    pub fn with(jobs: Arc<FakeJobs>, source: Arc<FakeSource>, config: EngineConfig) -> Self {
        let sync = Arc::new(RecordingScheduler::new());
        let store = Arc::new(MemoryStore::new());
        let workspace = Workspace::builder()
            .job(Some(JOB_ID))
            .remote(jobs.clone(), source.clone())
            .sync(sync.clone())
            .store(store.clone())
            .config(config)
            .build()
            .expect("job workspace should build");
        let events = workspace.events().subscribe();
        Self {
            workspace,
            jobs,
            source,
            sync,
            store,
            events,
        }
    }

    /// Initialize and wait for background loading to finish.
    pub async fn loaded(self) -> Self {
        self.workspace
            .initialize(None)
            .await
            .expect("initialize should succeed");
        wait_for_phase(&self.workspace, LoadPhase::Complete).await;
        self
    }

    /// Play one full sync cycle: dispatch queued operations, persist them in
    /// the fake server, report the cycle and wait until the engine applied it.
    pub async fn sync_cycle(&mut self) -> Vec<SyncOperation> {
        let sent = self.sync.dispatch();
        for op in &sent {
            self.source.persist(op);
        }
        self.sync.complete_cycle();
        self.wait_for(|kind| matches!(kind, EventKind::SyncApplied { .. }))
            .await;
        sent
    }

    pub async fn wait_for(&mut self, matches: impl Fn(&EventKind) -> bool) -> EngineEvent {
        next_event(&mut self.events, matches).await
    }
}

pub async fn wait_for_phase(workspace: &Workspace, phase: LoadPhase) -> LoadingProgress {
    let mut progress = workspace.progress();
    let reached = tokio::time::timeout(Duration::from_secs(10), progress.wait_for(|p| p.phase >= phase))
        .await
        .expect("timed out waiting for phase")
        .expect("progress channel closed")
        .clone();
    reached
}

pub async fn next_event(
    events: &mut broadcast::Receiver<EngineEvent>,
    matches: impl Fn(&EventKind) -> bool,
) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event.kind) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drain everything published so far.
pub fn drain(events: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn phases(events: &[EngineEvent]) -> Vec<LoadPhase> {
    events
        .iter()
        .filter_map(|event| match &event.kind {
            EventKind::PhaseChanged { progress } => Some(progress.phase),
            _ => None,
        })
        .collect()
}
