//! Per-image annotation loading.
//!
//! Fetches both geometry collections of one job image, converts them into
//! working-set records expressed in primary image ids, records confirmed
//! identities and merges the result. Nothing is merged unless the whole
//! response converted cleanly.

use std::sync::Arc;

use chrono::Utc;
use labelsync_core::annotation::AnnotationRecord;
use labelsync_core::classifier::{classify, Classification, EditKind, SyncOperation};
use labelsync_core::geometry::GeometryKind;
use labelsync_core::identity::Registration;
use labelsync_core::image::ImageRecord;
use labelsync_core::remote::ImageAnnotations;
use labelsync_core::types::{BackendId, EphemeralId, ImageId, JobImageId};
use labelsync_core::working_set::FollowUp;
use labelsync_core::CoreError;
use labelsync_events::EventKind;

use crate::state::{Context, Cycle, WorkspaceState};

/// Result of one load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { annotations: usize },
    /// Fetched earlier; nothing was requested.
    AlreadyLoaded,
    /// Another fetch of the same image is running.
    InFlight,
    /// The image is not part of the current manifest.
    UnknownImage,
    /// Fetch or conversion failed; the image stays unloaded.
    Failed,
    /// The cycle was cancelled while the fetch was running.
    Discarded,
}

pub(crate) struct ImageLoader {
    ctx: Arc<Context>,
}

impl ImageLoader {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Load `job_image_id` unless it was loaded before.
    pub async fn load(&self, job_image_id: JobImageId, cycle: &Cycle) -> LoadOutcome {
        self.run(job_image_id, cycle, false).await
    }

    /// Load `job_image_id` even when it was loaded before.
    pub async fn reload(&self, job_image_id: JobImageId, cycle: &Cycle) -> LoadOutcome {
        self.run(job_image_id, cycle, true).await
    }

    async fn run(&self, job_image_id: JobImageId, cycle: &Cycle, force: bool) -> LoadOutcome {
        let Some(remote) = self.ctx.remote.clone() else {
            return LoadOutcome::UnknownImage;
        };
        let Some(job_id) = self.ctx.job_id() else {
            return LoadOutcome::UnknownImage;
        };

        let image = {
            let mut state = self.ctx.state.write().await;
            let Some(image) = state.manifest.get_by_job_image(job_image_id).cloned() else {
                tracing::warn!(job_id, job_image_id = job_image_id.0, "Load requested for unknown image");
                return LoadOutcome::UnknownImage;
            };
            if !force && state.loaded.contains(&image.id) {
                return LoadOutcome::AlreadyLoaded;
            }
            if !state.in_flight.insert(image.id) {
                return LoadOutcome::InFlight;
            }
            image
        };

        let fetched = tokio::select! {
            _ = cycle.token.cancelled() => None,
            result = remote.source.fetch_annotations(job_id, job_image_id) => Some(result),
        };

        let response = match fetched {
            None => {
                self.release(image.id).await;
                return LoadOutcome::Discarded;
            }
            Some(Err(e)) => {
                self.release(image.id).await;
                self.failed(&image, e.to_string());
                return LoadOutcome::Failed;
            }
            Some(Ok(response)) => response,
        };

        let mut state = self.ctx.state.write().await;
        state.in_flight.remove(&image.id);
        if !cycle.is_live() {
            return LoadOutcome::Discarded;
        }

        let converted = match self.convert(&state, response) {
            Ok(converted) => converted,
            Err(e) => {
                drop(state);
                self.failed(&image, e.to_string());
                return LoadOutcome::Failed;
            }
        };

        for (ephemeral_id, backend_id) in converted.identities {
            if let Registration::Conflict { existing } =
                state.identities.confirm(ephemeral_id.clone(), backend_id)
            {
                tracing::warn!(
                    ephemeral_id = %ephemeral_id,
                    backend_id,
                    existing,
                    "Conflicting identity confirmation ignored",
                );
            }
        }

        let annotations = converted.records.len();
        let report = state.working_set.merge_image(image.id, converted.records);
        state.loaded.insert(image.id);
        let follow_ups = apply_follow_ups(&state, &self.ctx, report.follow_ups);
        drop(state);

        tracing::debug!(
            job_id,
            image_id = image.id.0,
            annotations,
            follow_ups,
            "Image annotations merged",
        );
        self.ctx.write_through(&report.upserted, &report.removed).await;
        self.ctx.publish(EventKind::ImageLoaded {
            image_id: image.id,
            annotations,
        });
        LoadOutcome::Loaded { annotations }
    }

    fn convert(
        &self,
        state: &WorkspaceState,
        response: ImageAnnotations,
    ) -> Result<Converted, CoreError> {
        let now = Utc::now();
        let mut converted = Converted::default();
        let ImageAnnotations {
            detections,
            segmentations,
        } = response;
        let collections = [
            (GeometryKind::Detection, detections),
            (GeometryKind::Segmentation, segmentations),
        ];

        for (kind, raws) in collections {
            for raw in raws {
                let Some(primary) = state.manifest.primary_for(raw.image_id) else {
                    tracing::warn!(
                        job_image_id = raw.image_id.0,
                        annotation_id = raw.id,
                        "Annotation references an image outside the job, skipping",
                    );
                    self.ctx.publish(EventKind::ImageSkipped {
                        job_image_id: raw.image_id,
                        reason: format!("annotation {} references an unknown image", raw.id),
                    });
                    continue;
                };
                let result = AnnotationRecord::from_remote(raw, kind, primary, now)?;
                if let Some(identity) = result.confirmed_identity {
                    converted.identities.push(identity);
                }
                converted.records.push(result.record);
            }
        }
        Ok(converted)
    }

    async fn release(&self, image_id: ImageId) {
        self.ctx.state.write().await.in_flight.remove(&image_id);
    }

    fn failed(&self, image: &ImageRecord, message: String) {
        tracing::error!(
            job_id = self.ctx.job_id(),
            image_id = image.id.0,
            job_image_id = image.job_image_id.0,
            error = %message,
            "Failed to load image annotations",
        );
        self.ctx.publish(EventKind::ImageLoadFailed {
            image_id: image.id,
            message,
        });
    }
}

#[derive(Default)]
struct Converted {
    records: Vec<AnnotationRecord>,
    identities: Vec<(EphemeralId, BackendId)>,
}

/// Hand merge follow-ups to the scheduler. Returns how many were applied.
fn apply_follow_ups(state: &WorkspaceState, ctx: &Context, follow_ups: Vec<FollowUp>) -> usize {
    let mut applied = 0;
    for follow_up in follow_ups {
        match follow_up {
            FollowUp::RetractCreate { ephemeral_id } => {
                ctx.sync.retract_create(&ephemeral_id);
            }
            FollowUp::Update { ephemeral_id } => {
                let Some(record) = state.working_set.get(&ephemeral_id) else {
                    continue;
                };
                let Some(image) = state.manifest.get(record.image_id) else {
                    continue;
                };
                if let Classification::Enqueue(op) =
                    classify(EditKind::Update, record, image, &state.identities)
                {
                    ctx.sync.enqueue(op);
                }
            }
            FollowUp::Delete { backend_id, kind } => {
                tracing::info!(backend_id, "Deleting annotation revealed after local delete");
                ctx.sync.enqueue(SyncOperation::Delete { backend_id, kind });
            }
        }
        applied += 1;
    }
    applied
}
