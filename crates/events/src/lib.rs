//! Event bus for labelsync engine notifications.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`EngineEvent`]: the event envelope, with [`EventKind`] carrying the
//!   event-specific data.
//!
//! Failures the engine tolerates (an image that could not be fetched, a job
//! that could not be auto-started, a rejected local store write) surface
//! here instead of being returned to the caller.

pub mod bus;

pub use bus::{EngineEvent, EventBus, EventKind};
