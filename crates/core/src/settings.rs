//! Autosave preferences, persisted as plain key/value settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const AUTOSAVE_ENABLED_KEY: &str = "annotation.autosave.enabled";
pub const AUTOSAVE_INTERVAL_KEY: &str = "annotation.autosave.interval_ms";

pub const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 30_000;
pub const MIN_AUTOSAVE_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveSettings {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(DEFAULT_AUTOSAVE_INTERVAL_MS),
        }
    }
}

impl AutosaveSettings {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self { enabled, interval }.clamped()
    }

    /// Read settings through `get`. Missing or unparsable values fall back
    /// to the defaults.
    pub fn from_entries(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let enabled = get(AUTOSAVE_ENABLED_KEY)
            .and_then(|v| v.trim().parse::<bool>().ok())
            .unwrap_or(defaults.enabled);
        let interval = get(AUTOSAVE_INTERVAL_KEY)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.interval);
        Self::new(enabled, interval)
    }

    /// Key/value pairs to persist.
    pub fn to_entries(&self) -> [(&'static str, String); 2] {
        [
            (AUTOSAVE_ENABLED_KEY, self.enabled.to_string()),
            (AUTOSAVE_INTERVAL_KEY, self.interval.as_millis().to_string()),
        ]
    }

    fn clamped(mut self) -> Self {
        let min = Duration::from_millis(MIN_AUTOSAVE_INTERVAL_MS);
        if self.interval < min {
            self.interval = min;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(entries: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_entries_use_defaults() {
        let settings = AutosaveSettings::from_entries(|_| None);
        assert_eq!(settings, AutosaveSettings::default());
        assert!(settings.enabled);
        assert_eq!(settings.interval, Duration::from_secs(30));
    }

    #[test]
    fn stored_entries_are_read() {
        let settings = AutosaveSettings::from_entries(lookup(&[
            (AUTOSAVE_ENABLED_KEY, "false"),
            (AUTOSAVE_INTERVAL_KEY, "5000"),
        ]));
        assert!(!settings.enabled);
        assert_eq!(settings.interval, Duration::from_secs(5));
    }

    #[test]
    fn garbage_values_fall_back() {
        let settings = AutosaveSettings::from_entries(lookup(&[
            (AUTOSAVE_ENABLED_KEY, "maybe"),
            (AUTOSAVE_INTERVAL_KEY, "soon"),
        ]));
        assert_eq!(settings, AutosaveSettings::default());
    }

    #[test]
    fn interval_is_clamped_to_minimum() {
        let settings = AutosaveSettings::new(true, Duration::from_millis(10));
        assert_eq!(settings.interval, Duration::from_millis(MIN_AUTOSAVE_INTERVAL_MS));
    }

    #[test]
    fn entries_round_trip() {
        let original = AutosaveSettings::new(false, Duration::from_millis(4500));
        let entries = original.to_entries();
        let restored = AutosaveSettings::from_entries(|key| {
            entries
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.clone())
        });
        assert_eq!(restored, original);
    }
}
