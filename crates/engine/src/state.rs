//! Shared state of one workspace.
//!
//! Everything the loader, the pipeline and the mutation paths touch lives
//! in [`Context`], shared via `Arc`. Annotation data sits behind a single
//! async `RwLock` so a per-image merge is never observed half-applied.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use labelsync_core::annotation::AnnotationRecord;
use labelsync_core::identity::IdentityMap;
use labelsync_core::image::ImageManifest;
use labelsync_core::progress::{LoadPhase, LoadingProgress, ProgressTracker};
use labelsync_core::types::{EphemeralId, ImageId, JobId};
use labelsync_core::working_set::WorkingSet;
use labelsync_events::{EngineEvent, EventBus, EventKind};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::ports::{AnnotationSource, JobService, LocalStore, SyncScheduler};

/// Annotation data of a workspace.
#[derive(Debug, Default)]
pub(crate) struct WorkspaceState {
    pub manifest: ImageManifest,
    pub working_set: WorkingSet,
    pub identities: IdentityMap,
    /// Images fetched at least once in the current job.
    pub loaded: HashSet<ImageId>,
    /// Images with a fetch currently running.
    pub in_flight: HashSet<ImageId>,
}

impl WorkspaceState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Replace the manifest and forget images it no longer lists. Returns
    /// the ids of the dropped annotations.
    pub fn install_manifest(&mut self, manifest: ImageManifest) -> Vec<EphemeralId> {
        self.manifest = manifest;
        let manifest = &self.manifest;
        self.loaded.retain(|id| manifest.get(*id).is_some());
        self.working_set
            .retain_images(|id| manifest.get(id).is_some())
    }
}

/// Remote services of a job-mode workspace.
#[derive(Clone)]
pub(crate) struct Remote {
    pub jobs: Arc<dyn JobService>,
    pub source: Arc<dyn AnnotationSource>,
}

/// Identifies an initialization request for the re-entrancy guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitKey {
    pub job_id: Option<JobId>,
    pub image_count: usize,
}

/// Handle on one load cycle. Work holding a cancelled handle must drop its
/// results.
#[derive(Debug, Clone)]
pub(crate) struct Cycle {
    pub generation: u64,
    pub token: CancellationToken,
}

impl Cycle {
    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
    }
}

struct CycleState {
    job_id: Option<JobId>,
    key: Option<InitKey>,
    token: CancellationToken,
    tracker: ProgressTracker,
}

pub(crate) struct Context {
    pub remote: Option<Remote>,
    pub store: Arc<dyn LocalStore>,
    pub sync: Arc<dyn SyncScheduler>,
    pub events: Arc<EventBus>,
    pub config: EngineConfig,
    pub state: RwLock<WorkspaceState>,
    root: CancellationToken,
    cycle: Mutex<CycleState>,
    progress: watch::Sender<LoadingProgress>,
}

impl Context {
    pub fn new(
        job_id: Option<JobId>,
        remote: Option<Remote>,
        store: Arc<dyn LocalStore>,
        sync: Arc<dyn SyncScheduler>,
        events: Arc<EventBus>,
        config: EngineConfig,
    ) -> Self {
        let root = CancellationToken::new();
        let (progress, _) = watch::channel(LoadingProgress::initial());
        Self {
            remote,
            store,
            sync,
            events,
            config,
            state: RwLock::new(WorkspaceState::default()),
            cycle: Mutex::new(CycleState {
                job_id,
                key: None,
                token: root.child_token(),
                tracker: ProgressTracker::new(),
            }),
            root,
            progress,
        }
    }

    fn lock_cycle(&self) -> MutexGuard<'_, CycleState> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_job_mode(&self) -> bool {
        self.remote.is_some()
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.lock_cycle().job_id
    }

    pub fn set_job_id(&self, job_id: JobId) {
        self.lock_cycle().job_id = Some(job_id);
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.root
    }

    // -- cycles -------------------------------------------------------------

    /// Cancel the running cycle and start a new one in `initial`.
    pub fn begin_cycle(&self, key: Option<InitKey>) -> Cycle {
        let mut cycle = self.lock_cycle();
        self.restart(&mut cycle, key)
    }

    /// Like [`begin_cycle`](Self::begin_cycle), unless a live cycle was
    /// started for the same key.
    pub fn try_begin_cycle(&self, key: InitKey) -> Option<Cycle> {
        let mut cycle = self.lock_cycle();
        if cycle.key == Some(key) && !cycle.token.is_cancelled() {
            return None;
        }
        Some(self.restart(&mut cycle, Some(key)))
    }

    fn restart(&self, cycle: &mut CycleState, key: Option<InitKey>) -> Cycle {
        cycle.token.cancel();
        cycle.token = self.root.child_token();
        cycle.key = key;
        let generation = cycle.tracker.begin_cycle();
        self.progress.send_replace(cycle.tracker.snapshot().clone());
        Cycle {
            generation,
            token: cycle.token.clone(),
        }
    }

    /// Whether a live cycle of `job_id` already got past its critical phase.
    pub fn has_ready_cycle(&self, job_id: JobId) -> bool {
        let cycle = self.lock_cycle();
        !cycle.token.is_cancelled()
            && cycle.key.is_some_and(|key| key.job_id == Some(job_id))
            && cycle.tracker.snapshot().phase >= LoadPhase::Ready
    }

    pub fn current_cycle(&self) -> Cycle {
        let cycle = self.lock_cycle();
        Cycle {
            generation: cycle.tracker.generation(),
            token: cycle.token.clone(),
        }
    }

    pub fn cancel_cycle(&self) {
        let mut cycle = self.lock_cycle();
        cycle.token.cancel();
        cycle.key = None;
    }

    // -- progress -----------------------------------------------------------

    pub fn subscribe_progress(&self) -> watch::Receiver<LoadingProgress> {
        self.progress.subscribe()
    }

    pub fn progress_snapshot(&self) -> LoadingProgress {
        self.progress.borrow().clone()
    }

    pub fn advance(&self, cycle: &Cycle, phase: LoadPhase, step: impl Into<String>) -> bool {
        if !cycle.is_live() {
            return false;
        }
        let (snapshot, job_id) = {
            let mut state = self.lock_cycle();
            if !state.tracker.advance(cycle.generation, phase, step) {
                return false;
            }
            let snapshot = state.tracker.snapshot().clone();
            self.progress.send_replace(snapshot.clone());
            (snapshot, state.job_id)
        };
        tracing::info!(
            job_id,
            phase = snapshot.phase.as_str(),
            step = %snapshot.step,
            "Load phase changed",
        );
        self.events.publish(
            EngineEvent::new(EventKind::PhaseChanged { progress: snapshot }).for_job(job_id),
        );
        true
    }

    pub fn report(&self, cycle: &Cycle, current: usize, total: usize, step: impl Into<String>) -> bool {
        if !cycle.is_live() {
            return false;
        }
        let mut state = self.lock_cycle();
        if !state.tracker.report(cycle.generation, current, total, step) {
            return false;
        }
        self.progress.send_replace(state.tracker.snapshot().clone());
        true
    }

    pub fn halt(&self, cycle: &Cycle, step: impl Into<String>) -> bool {
        let mut state = self.lock_cycle();
        if !state.tracker.halt(cycle.generation, step) {
            return false;
        }
        self.progress.send_replace(state.tracker.snapshot().clone());
        true
    }

    // -- notifications ------------------------------------------------------

    pub fn publish(&self, kind: EventKind) {
        self.events
            .publish(EngineEvent::new(kind).for_job(self.job_id()));
    }

    /// Mirror working-set changes into the local store. Failures are
    /// reported, never propagated.
    pub async fn write_through(&self, upserts: &[AnnotationRecord], removals: &[EphemeralId]) {
        if !upserts.is_empty() {
            if let Err(e) = self.store.update_many(upserts).await {
                self.store_failed(e.to_string());
            }
        }
        if !removals.is_empty() {
            if let Err(e) = self.store.remove_many(removals).await {
                self.store_failed(e.to_string());
            }
        }
    }

    pub fn store_failed(&self, message: String) {
        tracing::error!(error = %message, "Local store write failed");
        self.publish(EventKind::StoreWriteFailed { message });
    }
}
