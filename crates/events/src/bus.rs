//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between a workspace and
//! whatever observes it (UI bridge, CLI progress printer, tests).

use chrono::{DateTime, Utc};
use labelsync_core::progress::LoadingProgress;
use labelsync_core::types::{ImageId, JobId, JobImageId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// EngineEvent
// ---------------------------------------------------------------------------

/// Event-specific data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The load pipeline entered a new phase.
    PhaseChanged { progress: LoadingProgress },
    /// One image's annotations were fetched and merged.
    ImageLoaded { image_id: ImageId, annotations: usize },
    /// Fetching or converting one image failed. Not retried automatically.
    ImageLoadFailed { image_id: ImageId, message: String },
    /// A job image or a server record was left out of the manifest.
    ImageSkipped { job_image_id: JobImageId, reason: String },
    /// Auto-starting a new job failed; loading continued.
    JobStartFailed { message: String },
    /// The local store rejected a write; the working set is unaffected.
    StoreWriteFailed { message: String },
    /// A sync cycle finished and loaded images were refreshed.
    SyncApplied { pending: usize },
}

impl EventKind {
    /// Dot-separated event name, e.g. `"image.load_failed"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhaseChanged { .. } => "workspace.phase_changed",
            Self::ImageLoaded { .. } => "image.loaded",
            Self::ImageLoadFailed { .. } => "image.load_failed",
            Self::ImageSkipped { .. } => "image.skipped",
            Self::JobStartFailed { .. } => "job.start_failed",
            Self::StoreWriteFailed { .. } => "store.write_failed",
            Self::SyncApplied { .. } => "sync.applied",
        }
    }

    /// Whether the event reports something going wrong.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::ImageLoadFailed { .. } | Self::JobStartFailed { .. } | Self::StoreWriteFailed { .. }
        )
    }
}

/// An engine notification.
///
/// Constructed via [`EngineEvent::new`] and optionally scoped to a job with
/// [`for_job`](EngineEvent::for_job).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub kind: EventKind,

    /// Job the event belongs to; `None` in local-only workspaces.
    pub job_id: Option<JobId>,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            job_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_job(mut self, job_id: Option<JobId>) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`EngineEvent`].
///
/// ```rust
/// use labelsync_events::{EngineEvent, EventBus, EventKind};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(EngineEvent::new(EventKind::SyncApplied { pending: 0 }));
/// ```
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Without subscribers the event is silently dropped.
    pub fn publish(&self, event: EngineEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(
            EngineEvent::new(EventKind::ImageLoadFailed {
                image_id: ImageId(4),
                message: "timeout".into(),
            })
            .for_job(Some(12)),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.name(), "image.load_failed");
        assert_eq!(received.job_id, Some(12));
        assert!(received.kind.is_failure());
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(EngineEvent::new(EventKind::SyncApplied { pending: 0 }));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1, e2);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::new(EventKind::JobStartFailed {
            message: "forbidden".into(),
        }));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = EngineEvent::new(EventKind::PhaseChanged {
            progress: LoadingProgress::initial(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"]["type"], "phase_changed");
        assert_eq!(json["kind"]["progress"]["phase"], "initial");
        assert!(json["job_id"].is_null());
        assert!(!event.kind.is_failure());
    }
}
