use labelsync_core::error::CoreError;
use labelsync_core::types::{EphemeralId, ImageId};

use crate::ports::{RemoteError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown annotation: {0}")]
    UnknownAnnotation(EphemeralId),

    #[error("Unknown image: {0}")]
    UnknownImage(ImageId),

    /// The operation needs a job-backed workspace.
    #[error("Workspace has no job")]
    NoJob,

    #[error("Workspace misconfigured: {0}")]
    Misconfigured(&'static str),
}
