use async_trait::async_trait;
use chrono::Utc;
use labelsync_core::classifier::SyncOperation;
use labelsync_core::settings::AutosaveSettings;
use labelsync_core::types::EphemeralId;

use crate::ports::{OnSynced, RemoteError, SyncReport, SyncScheduler, SyncStatus};

/// Scheduler of a local-only workspace: nothing is ever queued or sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct InertSync;

#[async_trait]
impl SyncScheduler for InertSync {
    fn enqueue(&self, _op: SyncOperation) {}

    fn retract_create(&self, _ephemeral_id: &EphemeralId) -> bool {
        false
    }

    fn status(&self) -> SyncStatus {
        SyncStatus {
            pending: 0,
            last_synced_at: None,
            online: false,
        }
    }

    async fn sync_now(&self) -> Result<SyncReport, RemoteError> {
        Ok(SyncReport {
            completed_at: Utc::now(),
            pending: 0,
        })
    }

    fn set_autosave(&self, _settings: AutosaveSettings) {}

    fn on_synced(&self, _callback: OnSynced) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_nothing_pending_and_offline() {
        let sync = InertSync;
        let status = sync.status();
        assert_eq!(status.pending, 0);
        assert!(status.last_synced_at.is_none());
        assert!(!status.online);
        assert_eq!(sync.sync_now().await.unwrap().pending, 0);
        assert!(!sync.retract_create(&EphemeralId::new("a1")));
    }
}
