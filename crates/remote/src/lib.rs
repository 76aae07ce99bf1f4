//! HTTP adapters for the remote job and annotation services.
//!
//! [`JobApi`] implements the engine's [`JobService`](labelsync_engine::JobService)
//! port and [`AnnotationApi`] its
//! [`AnnotationSource`](labelsync_engine::AnnotationSource) port. The
//! annotation client also exposes the write endpoints a sync scheduler
//! dispatches classified operations to.

pub mod annotations;
pub mod client;
pub mod jobs;

pub use annotations::{Applied, AnnotationApi, BatchPlan, BatchResult};
pub use client::{ApiClient, RemoteApiError};
pub use jobs::JobApi;
