//! Image identity mapping for one job.
//!
//! The rest of the engine addresses images by their primary id (shared id
//! when present, else job-scoped id). Job-bound server calls need the
//! job-scoped id back, so the manifest keeps both directions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::remote::JobImage;
use crate::types::{ImageId, JobImageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: ImageId,
    pub job_image_id: JobImageId,
    pub width: u32,
    pub height: u32,
    pub storage_key: String,
}

impl ImageRecord {
    pub fn from_job_image(image: JobImage) -> Self {
        let id = ImageId(image.shared_image_id.unwrap_or(image.id.0));
        Self {
            id,
            job_image_id: image.id,
            width: image.width,
            height: image.height,
            storage_key: image.storage_key,
        }
    }
}

/// Externally requested image, e.g. from a query parameter.
///
/// The raw id is matched against primary ids first, then job-scoped ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSelector(pub i64);

impl TargetSelector {
    /// Parse a selector from its textual form; blank or non-numeric input
    /// yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok().map(Self)
    }
}

/// The ordered image list of a job plus both id lookups.
#[derive(Debug, Clone, Default)]
pub struct ImageManifest {
    images: Vec<ImageRecord>,
    by_primary: HashMap<ImageId, usize>,
    primary_by_job_image: HashMap<JobImageId, ImageId>,
}

impl ImageManifest {
    /// Build the manifest from a job listing, preserving listing order.
    ///
    /// When two job images share one primary id, the first listed wins and
    /// the later ones are dropped.
    pub fn from_job_images(images: impl IntoIterator<Item = JobImage>) -> Self {
        Self::from_images(images.into_iter().map(ImageRecord::from_job_image))
    }

    /// Build the manifest from already-resolved image records, e.g. the
    /// images opened in a local-only workspace.
    pub fn from_images(images: impl IntoIterator<Item = ImageRecord>) -> Self {
        let mut manifest = Self::default();
        for record in images {
            if manifest.by_primary.contains_key(&record.id) {
                continue;
            }
            manifest
                .primary_by_job_image
                .insert(record.job_image_id, record.id);
            manifest.by_primary.insert(record.id, manifest.images.len());
            manifest.images.push(record);
        }
        manifest
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRecord> {
        self.images.iter()
    }

    pub fn first(&self) -> Option<&ImageRecord> {
        self.images.first()
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageRecord> {
        self.by_primary.get(&id).map(|&index| &self.images[index])
    }

    pub fn get_by_job_image(&self, id: JobImageId) -> Option<&ImageRecord> {
        self.primary_for(id).and_then(|primary| self.get(primary))
    }

    /// Job-scoped ids from `listed` that did not make it into the manifest
    /// because an earlier image claimed the same primary id.
    pub fn dropped(&self, listed: impl IntoIterator<Item = JobImageId>) -> Vec<JobImageId> {
        listed
            .into_iter()
            .filter(|id| !self.primary_by_job_image.contains_key(id))
            .collect()
    }

    /// Job-scoped → primary.
    pub fn primary_for(&self, id: JobImageId) -> Option<ImageId> {
        self.primary_by_job_image.get(&id).copied()
    }

    /// Primary → job-scoped.
    pub fn job_image_for(&self, id: ImageId) -> Option<JobImageId> {
        self.get(id).map(|image| image.job_image_id)
    }

    /// Pick the image to load before the workspace reports ready.
    ///
    /// Falls back to the first image when the selector is absent or does
    /// not match anything in this job.
    pub fn resolve_target(&self, selector: Option<TargetSelector>) -> Option<&ImageRecord> {
        selector
            .and_then(|TargetSelector(raw)| {
                self.get(ImageId(raw))
                    .or_else(|| self.get_by_job_image(JobImageId(raw)))
            })
            .or_else(|| self.first())
    }
}
