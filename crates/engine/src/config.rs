use std::time::Duration;

use labelsync_core::remote::DEFAULT_PAGE_SIZE;

/// Images fetched concurrently per background batch.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Pause between background batches.
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(200);

/// Pause between `ready` and the start of background loading.
pub const DEFAULT_BACKGROUND_START_DELAY: Duration = Duration::from_millis(100);

/// Tuning of the load pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub background_start_delay: Duration,
    /// Page size for job image listings.
    pub page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
            background_start_delay: DEFAULT_BACKGROUND_START_DELAY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default |
    /// |---------------------------------|---------|
    /// | `LABELSYNC_BATCH_SIZE`          | `5`     |
    /// | `LABELSYNC_BATCH_DELAY_MS`      | `200`   |
    /// | `LABELSYNC_BACKGROUND_DELAY_MS` | `100`   |
    /// | `LABELSYNC_PAGE_SIZE`           | `100`   |
    ///
    /// Unparsable or zero sizes fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let batch_size: usize = get("LABELSYNC_BATCH_SIZE")
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.batch_size);

        let batch_delay = get("LABELSYNC_BATCH_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.batch_delay);

        let background_start_delay = get("LABELSYNC_BACKGROUND_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.background_start_delay);

        let page_size: u32 = get("LABELSYNC_PAGE_SIZE")
            .and_then(|v| v.parse().ok())
            .filter(|&n| n > 0)
            .unwrap_or(defaults.page_size);

        Self {
            batch_size,
            batch_delay,
            background_start_delay,
            page_size,
        }
    }
}
