//! Job annotation synchronization engine.
//!
//! A [`Workspace`] keeps a local working set of annotations consistent with
//! a remote job under intermittent connectivity:
//!
//! - prioritized loading: the target image first, the rest of the job in
//!   rate-limited background batches ([`pipeline`]);
//! - per-image fetch, conversion and lifecycle-aware merge ([`loader`]);
//! - classification of every local edit into create/update/delete
//!   operations for the injected [`SyncScheduler`];
//! - job mode vs local-only solo mode behind one surface ([`workspace`]).
//!
//! Transport, durable storage and the scheduler itself are consumed through
//! the traits in [`ports`].

pub mod config;
pub mod error;
pub mod inert;
pub mod loader;
pub mod memory;
mod mutations;
pub mod pipeline;
pub mod ports;
mod state;
pub mod workspace;

pub use config::EngineConfig;
pub use error::EngineError;
pub use inert::InertSync;
pub use loader::LoadOutcome;
pub use memory::{MemorySettings, MemoryStore};
pub use pipeline::{LoadSummary, StartOutcome};
pub use ports::{
    AnnotationSource, JobService, LocalStore, OnSynced, RemoteError, SettingsStore, StoreError,
    SyncReport, SyncScheduler, SyncStatus,
};
pub use state::InitKey;
pub use workspace::{Mode, Workspace, WorkspaceBuilder};
