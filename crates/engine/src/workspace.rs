//! The annotation workspace and its mode selection.
//!
//! A workspace built with a job id talks to the remote services and the
//! sync scheduler ("job mode"). Without one it works purely locally ("solo
//! mode") with an inert scheduler. Both modes expose the same surface.

use std::sync::{Arc, Mutex, PoisonError};

use labelsync_core::annotation::AnnotationRecord;
use labelsync_core::image::{ImageRecord, TargetSelector};
use labelsync_core::progress::LoadingProgress;
use labelsync_core::settings::AutosaveSettings;
use labelsync_core::types::{BackendId, EphemeralId, ImageId, JobId};
use labelsync_events::EventBus;
use tokio::sync::{mpsc, watch};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::inert::InertSync;
use crate::loader::{ImageLoader, LoadOutcome};
use crate::memory::{MemorySettings, MemoryStore};
use crate::pipeline::{self, LoadSummary, ReloadScope, StartOutcome};
use crate::ports::{
    AnnotationSource, JobService, LocalStore, SettingsStore, SyncReport, SyncScheduler, SyncStatus,
};
use crate::state::{Context, Remote};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Backed by a remote job.
    Job,
    /// Local-only; nothing is ever synchronized.
    Solo,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct WorkspaceBuilder {
    job_id: Option<JobId>,
    jobs: Option<Arc<dyn JobService>>,
    source: Option<Arc<dyn AnnotationSource>>,
    sync: Option<Arc<dyn SyncScheduler>>,
    store: Option<Arc<dyn LocalStore>>,
    settings: Option<Arc<dyn SettingsStore>>,
    events: Option<Arc<EventBus>>,
    config: EngineConfig,
    images: Vec<ImageRecord>,
}

impl WorkspaceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select job mode for `job_id`; `None` selects solo mode.
    pub fn job(mut self, job_id: Option<JobId>) -> Self {
        self.job_id = job_id;
        self
    }

    /// Remote services used in job mode.
    pub fn remote(mut self, jobs: Arc<dyn JobService>, source: Arc<dyn AnnotationSource>) -> Self {
        self.jobs = Some(jobs);
        self.source = Some(source);
        self
    }

    pub fn sync(mut self, sync: Arc<dyn SyncScheduler>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Images of a solo-mode workspace.
    pub fn images(mut self, images: Vec<ImageRecord>) -> Self {
        self.images = images;
        self
    }

    pub fn build(self) -> Result<Workspace, EngineError> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn LocalStore>);
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(MemorySettings::new()) as Arc<dyn SettingsStore>);
        let events = self.events.unwrap_or_default();
        let autosave = AutosaveSettings::from_entries(|key| settings.get(key));

        let (mode, remote, sync) = match self.job_id {
            Some(_) => {
                let jobs = self
                    .jobs
                    .ok_or(EngineError::Misconfigured("job mode needs a job service"))?;
                let source = self
                    .source
                    .ok_or(EngineError::Misconfigured("job mode needs an annotation source"))?;
                let sync = self
                    .sync
                    .ok_or(EngineError::Misconfigured("job mode needs a sync scheduler"))?;
                (Mode::Job, Some(Remote { jobs, source }), sync)
            }
            None => (Mode::Solo, None, Arc::new(InertSync) as Arc<dyn SyncScheduler>),
        };

        sync.set_autosave(autosave);
        let (report_tx, report_rx) = mpsc::unbounded_channel::<SyncReport>();
        sync.on_synced(Arc::new(move |report: SyncReport| {
            let _ = report_tx.send(report);
        }));

        let ctx = Arc::new(Context::new(
            self.job_id,
            remote,
            store,
            sync,
            events,
            self.config,
        ));

        Ok(Workspace {
            mode,
            ctx,
            settings,
            autosave: Mutex::new(autosave),
            images: self.images,
            sync_reports: Mutex::new(Some(report_rx)),
        })
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

pub struct Workspace {
    mode: Mode,
    pub(crate) ctx: Arc<Context>,
    settings: Arc<dyn SettingsStore>,
    autosave: Mutex<AutosaveSettings>,
    images: Vec<ImageRecord>,
    /// Taken by the first `initialize`, which starts the sync listener.
    sync_reports: Mutex<Option<mpsc::UnboundedReceiver<SyncReport>>>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace").field("mode", &self.mode).finish_non_exhaustive()
    }
}

impl Workspace {
    pub fn builder() -> WorkspaceBuilder {
        WorkspaceBuilder::new()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.ctx.job_id()
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.ctx.events.clone()
    }

    // -- loading ------------------------------------------------------------

    /// Load the workspace.
    ///
    /// In job mode this fetches the job and its image listing, loads the
    /// target image and returns once the workspace is `ready`; remaining
    /// images load in the background. A repeated call for the same job and
    /// image count is suppressed.
    pub async fn initialize(&self, target: Option<TargetSelector>) -> Result<StartOutcome, EngineError> {
        self.start_sync_listener();
        match self.mode {
            Mode::Job => pipeline::initialize_job(&self.ctx, target).await,
            Mode::Solo => Ok(pipeline::initialize_solo(&self.ctx, &self.images).await),
        }
    }

    fn start_sync_listener(&self) {
        let receiver = self
            .sync_reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(receiver) = receiver {
            if self.mode == Mode::Job {
                pipeline::spawn_sync_listener(self.ctx.clone(), receiver);
            }
        }
    }

    pub fn progress(&self) -> watch::Receiver<LoadingProgress> {
        self.ctx.subscribe_progress()
    }

    pub fn current_progress(&self) -> LoadingProgress {
        self.ctx.progress_snapshot()
    }

    /// Load one image now instead of waiting for background loading.
    pub async fn ensure_loaded(&self, image_id: ImageId) -> Result<LoadOutcome, EngineError> {
        let job_image_id = self
            .ctx
            .state
            .read()
            .await
            .manifest
            .job_image_for(image_id)
            .ok_or(EngineError::UnknownImage(image_id))?;
        if self.mode == Mode::Solo {
            return Ok(LoadOutcome::AlreadyLoaded);
        }
        let cycle = self.ctx.current_cycle();
        Ok(ImageLoader::new(self.ctx.clone())
            .load(job_image_id, &cycle)
            .await)
    }

    /// Re-fetch every image of the job, including ones that failed before.
    pub async fn reload(&self) -> LoadSummary {
        pipeline::reload(&self.ctx, ReloadScope::All).await
    }

    /// Point a job-mode workspace at another job and initialize it.
    pub async fn switch_job(
        &self,
        job_id: JobId,
        target: Option<TargetSelector>,
    ) -> Result<StartOutcome, EngineError> {
        if self.mode == Mode::Solo {
            return Err(EngineError::NoJob);
        }
        tracing::info!(from = self.ctx.job_id(), to = job_id, "Switching job");
        self.ctx.cancel_cycle();
        self.ctx.state.write().await.clear();
        self.ctx.set_job_id(job_id);
        self.initialize(target).await
    }

    /// Stop background work. The workspace stays readable.
    pub fn shutdown(&self) {
        self.ctx.shutdown_token().cancel();
    }

    // -- reads --------------------------------------------------------------

    pub async fn images(&self) -> Vec<ImageRecord> {
        self.ctx.state.read().await.manifest.iter().cloned().collect()
    }

    pub async fn annotations(&self) -> Vec<AnnotationRecord> {
        self.ctx.state.read().await.working_set.iter().cloned().collect()
    }

    pub async fn annotations_for(&self, image_id: ImageId) -> Vec<AnnotationRecord> {
        self.ctx
            .state
            .read()
            .await
            .working_set
            .for_image(image_id)
            .cloned()
            .collect()
    }

    pub async fn annotation(&self, id: &EphemeralId) -> Option<AnnotationRecord> {
        self.ctx.state.read().await.working_set.get(id).cloned()
    }

    pub async fn is_loaded(&self, image_id: ImageId) -> bool {
        self.ctx.state.read().await.loaded.contains(&image_id)
    }

    /// Confirmed backend id of an annotation, if any.
    pub async fn backend_id(&self, id: &EphemeralId) -> Option<BackendId> {
        let state = self.ctx.state.read().await;
        state
            .working_set
            .get(id)
            .and_then(|record| record.backend_id)
            .or_else(|| state.identities.get(id))
    }

    // -- sync ---------------------------------------------------------------

    pub fn sync_status(&self) -> SyncStatus {
        self.ctx.sync.status()
    }

    pub async fn sync_now(&self) -> Result<SyncReport, EngineError> {
        Ok(self.ctx.sync.sync_now().await?)
    }

    pub fn autosave(&self) -> AutosaveSettings {
        *self.autosave.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change autosave preferences, persist them and hand them to the
    /// scheduler.
    pub fn set_autosave(&self, settings: AutosaveSettings) -> Result<AutosaveSettings, EngineError> {
        let settings = AutosaveSettings::new(settings.enabled, settings.interval);
        for (key, value) in settings.to_entries() {
            self.settings.set(key, &value)?;
        }
        *self.autosave.lock().unwrap_or_else(PoisonError::into_inner) = settings;
        self.ctx.sync.set_autosave(settings);
        tracing::info!(
            enabled = settings.enabled,
            interval_ms = settings.interval.as_millis() as u64,
            "Autosave settings changed",
        );
        Ok(settings)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.ctx.shutdown_token().cancel();
    }
}
