//! Prioritized and background loading of a job's images.
//!
//! A cycle loads the target image first, reports `ready`, then fetches the
//! remaining images in fixed-size concurrent batches with a pause between
//! batches. Starting a new cycle cancels the previous one; its late results
//! are dropped by the loader and its progress updates by the tracker.

use std::sync::Arc;

use futures::future::join_all;
use labelsync_core::image::{ImageManifest, ImageRecord, TargetSelector};
use labelsync_core::progress::LoadPhase;
use labelsync_core::remote::{JobImage, PageRequest};
use labelsync_core::types::{JobId, JobImageId};
use labelsync_events::EventKind;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::loader::{ImageLoader, LoadOutcome};
use crate::ports::{RemoteError, SyncReport};
use crate::state::{Context, Cycle, InitKey, Remote};

/// Result of an initialization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A cycle for the same job and image count is already running or done.
    Suppressed,
}

/// Tally of a batched load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub failed: usize,
    /// Already loaded, in flight elsewhere, or discarded.
    pub skipped: usize,
}

impl LoadSummary {
    fn record(&mut self, outcome: LoadOutcome) {
        match outcome {
            LoadOutcome::Loaded { .. } => self.loaded += 1,
            LoadOutcome::Failed | LoadOutcome::UnknownImage => self.failed += 1,
            LoadOutcome::AlreadyLoaded | LoadOutcome::InFlight | LoadOutcome::Discarded => {
                self.skipped += 1
            }
        }
    }

    pub fn attempted(&self) -> usize {
        self.loaded + self.failed + self.skipped
    }
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

/// Initialize a job-mode workspace. Returns once the target image has been
/// attempted; the rest of the job loads in a spawned task.
pub(crate) async fn initialize_job(
    ctx: &Arc<Context>,
    target: Option<TargetSelector>,
) -> Result<StartOutcome, EngineError> {
    let remote = ctx.remote.clone().ok_or(EngineError::NoJob)?;
    let job_id = ctx.job_id().ok_or(EngineError::NoJob)?;

    let images = match fetch_job_images(ctx, &remote, job_id).await {
        Ok(images) => images,
        Err(e) => {
            tracing::error!(job_id, error = %e, "Failed to load job");
            if ctx.has_ready_cycle(job_id) {
                tracing::warn!(job_id, "Keeping the running load cycle");
            } else {
                let cycle = ctx.begin_cycle(None);
                ctx.halt(&cycle, format!("Failed to load job {job_id}: {e}"));
            }
            return Err(e.into());
        }
    };

    let listed: Vec<JobImageId> = images.iter().map(|image| image.id).collect();
    let manifest = ImageManifest::from_job_images(images);

    let key = InitKey {
        job_id: Some(job_id),
        image_count: manifest.len(),
    };
    let Some(cycle) = ctx.try_begin_cycle(key) else {
        tracing::debug!(job_id, images = key.image_count, "Initialization suppressed");
        return Ok(StartOutcome::Suppressed);
    };

    for job_image_id in manifest.dropped(listed) {
        tracing::warn!(
            job_id,
            job_image_id = job_image_id.0,
            "Image shares its primary id with an earlier image, skipping",
        );
        ctx.publish(EventKind::ImageSkipped {
            job_image_id,
            reason: "primary id already used by another image in the job".to_string(),
        });
    }
    tracing::info!(job_id, images = manifest.len(), "Job manifest loaded");
    let removed = ctx.state.write().await.install_manifest(manifest);
    if !removed.is_empty() {
        tracing::info!(
            job_id,
            annotations = removed.len(),
            "Dropped annotations of images no longer in the job",
        );
        ctx.write_through(&[], &removed).await;
    }
    run_cycle(ctx, cycle, target).await;
    Ok(StartOutcome::Started)
}

/// Initialize a local-only workspace from the images it was opened with.
pub(crate) async fn initialize_solo(ctx: &Arc<Context>, images: &[ImageRecord]) -> StartOutcome {
    let key = InitKey {
        job_id: None,
        image_count: images.len(),
    };
    let Some(cycle) = ctx.try_begin_cycle(key) else {
        return StartOutcome::Suppressed;
    };

    {
        let mut state = ctx.state.write().await;
        state.manifest = ImageManifest::from_images(images.iter().cloned());
        state.loaded = state.manifest.iter().map(|image| image.id).collect();
    }
    ctx.advance(&cycle, LoadPhase::Ready, "Local workspace ready");
    ctx.advance(&cycle, LoadPhase::Complete, "Local workspace ready");
    StartOutcome::Started
}

async fn fetch_job_images(
    ctx: &Context,
    remote: &Remote,
    job_id: JobId,
) -> Result<Vec<JobImage>, RemoteError> {
    let job = remote.jobs.get_job(job_id).await?;
    if job.status.needs_start() {
        match remote.jobs.start_job(job_id).await {
            Ok(()) => tracing::info!(job_id, "Job started"),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to auto-start job");
                ctx.publish(EventKind::JobStartFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    let mut images = Vec::new();
    let mut page = PageRequest::first(ctx.config.page_size);
    loop {
        let listing = remote.jobs.list_job_images(job_id, page).await?;
        images.extend(listing.items);
        match listing.next_page {
            Some(next) if next > page.page => page = PageRequest { page: next, ..page },
            _ => break,
        }
    }
    Ok(images)
}

/// Critical phase inline, background phase spawned.
async fn run_cycle(ctx: &Arc<Context>, cycle: Cycle, target: Option<TargetSelector>) {
    let (target, remaining) = {
        let state = ctx.state.read().await;
        let target = state.manifest.resolve_target(target).cloned();
        let remaining: Vec<JobImageId> = state
            .manifest
            .iter()
            .filter(|image| target.as_ref().map(|t| t.id) != Some(image.id))
            .map(|image| image.job_image_id)
            .collect();
        (target, remaining)
    };

    let Some(target) = target else {
        ctx.advance(&cycle, LoadPhase::Ready, "Job has no images");
        ctx.advance(&cycle, LoadPhase::Complete, "Job has no images");
        return;
    };

    ctx.advance(
        &cycle,
        LoadPhase::LoadingCritical,
        format!("Loading annotations for image {}", target.id),
    );
    let outcome = ImageLoader::new(ctx.clone())
        .load(target.job_image_id, &cycle)
        .await;
    let step = match outcome {
        LoadOutcome::Failed => format!("Annotations for image {} failed to load", target.id),
        _ => "Ready".to_string(),
    };
    ctx.advance(&cycle, LoadPhase::Ready, step);

    if remaining.is_empty() {
        ctx.advance(&cycle, LoadPhase::Complete, "All images loaded");
        return;
    }

    let ctx = ctx.clone();
    tokio::spawn(async move { load_background(ctx, cycle, remaining).await });
}

async fn load_background(ctx: Arc<Context>, cycle: Cycle, remaining: Vec<JobImageId>) {
    tokio::select! {
        _ = cycle.token.cancelled() => return,
        _ = tokio::time::sleep(ctx.config.background_start_delay) => {}
    }

    let total = remaining.len();
    if !ctx.advance(
        &cycle,
        LoadPhase::BackgroundLoading,
        format!("Loading {total} remaining images"),
    ) {
        return;
    }

    let loader = ImageLoader::new(ctx.clone());
    let summary = load_in_batches(&ctx, &loader, &cycle, &remaining, false, |done| {
        ctx.report(&cycle, done, total, format!("Loaded {done} of {total} images"));
    })
    .await;

    let Some(summary) = summary else {
        tracing::debug!(generation = cycle.generation, "Background loading cancelled");
        return;
    };
    tracing::info!(
        job_id = ctx.job_id(),
        loaded = summary.loaded,
        failed = summary.failed,
        skipped = summary.skipped,
        "Background loading finished",
    );
    let step = if summary.failed == 0 {
        "All images loaded".to_string()
    } else {
        format!("{} images failed to load", summary.failed)
    };
    ctx.advance(&cycle, LoadPhase::Complete, step);
}

/// Load `ids` in batches of `batch_size`, pausing between batches.
///
/// Returns `None` when the cycle was cancelled part-way.
async fn load_in_batches(
    ctx: &Context,
    loader: &ImageLoader,
    cycle: &Cycle,
    ids: &[JobImageId],
    force: bool,
    mut on_batch: impl FnMut(usize),
) -> Option<LoadSummary> {
    let mut summary = LoadSummary::default();
    for (index, batch) in ids.chunks(ctx.config.batch_size.max(1)).enumerate() {
        if index > 0 {
            tokio::select! {
                _ = cycle.token.cancelled() => return None,
                _ = tokio::time::sleep(ctx.config.batch_delay) => {}
            }
        }

        let outcomes = join_all(batch.iter().map(|&id| async move {
            if force {
                loader.reload(id, cycle).await
            } else {
                loader.load(id, cycle).await
            }
        }))
        .await;
        outcomes.into_iter().for_each(|outcome| summary.record(outcome));

        if !cycle.is_live() {
            return None;
        }
        on_batch(summary.attempted());
    }
    Some(summary)
}

// ---------------------------------------------------------------------------
// Reloads
// ---------------------------------------------------------------------------

/// Which images a reload covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReloadScope {
    /// Every image in the manifest.
    All,
    /// Only images fetched at least once.
    Loaded,
}

/// Force-reload images in the same batched, rate-limited way as background
/// loading.
pub(crate) async fn reload(ctx: &Arc<Context>, scope: ReloadScope) -> LoadSummary {
    if !ctx.is_job_mode() {
        return LoadSummary::default();
    }
    let ids: Vec<JobImageId> = {
        let state = ctx.state.read().await;
        state
            .manifest
            .iter()
            .filter(|image| scope == ReloadScope::All || state.loaded.contains(&image.id))
            .map(|image| image.job_image_id)
            .collect()
    };

    let cycle = ctx.current_cycle();
    let loader = ImageLoader::new(ctx.clone());
    load_in_batches(ctx, &loader, &cycle, &ids, true, |_| {})
        .await
        .unwrap_or_default()
}

/// Apply a completed sync cycle: settle flushed records, then refresh
/// loaded images so confirmed identities reach the identity map.
pub(crate) async fn apply_sync_report(ctx: &Arc<Context>, report: SyncReport) {
    if report.pending == 0 {
        let changed = {
            let mut state = ctx.state.write().await;
            // Edits enqueue under this lock; anything queued since the cycle
            // finished stays pending.
            if ctx.sync.status().pending == 0 {
                state.working_set.flush()
            } else {
                tracing::debug!("Edits queued since the sync cycle, skipping flush");
                Vec::new()
            }
        };
        ctx.write_through(&changed, &[]).await;
    }
    let summary = reload(ctx, ReloadScope::Loaded).await;
    tracing::info!(
        job_id = ctx.job_id(),
        pending = report.pending,
        reloaded = summary.loaded,
        failed = summary.failed,
        "Sync cycle applied",
    );
    ctx.publish(EventKind::SyncApplied {
        pending: report.pending,
    });
}

/// Consume sync reports until the workspace shuts down.
pub(crate) fn spawn_sync_listener(
    ctx: Arc<Context>,
    mut reports: mpsc::UnboundedReceiver<SyncReport>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = ctx.shutdown_token().clone();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Sync listener shutting down");
                    break;
                }
                report = reports.recv() => {
                    let Some(report) = report else { break };
                    apply_sync_report(&ctx, report).await;
                }
            }
        }
    })
}
