//! In-memory adapters for the local store and settings ports.
//!
//! Used when no durable backend is injected, and by tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use labelsync_core::annotation::AnnotationRecord;
use labelsync_core::types::EphemeralId;
use tokio::sync::RwLock;

use crate::ports::{LocalStore, SettingsStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<EphemeralId, AnnotationRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &EphemeralId) -> Option<AnnotationRecord> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn records(&self) -> Vec<AnnotationRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn add(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
        self.update(record).await
    }

    async fn add_many(&self, records: &[AnnotationRecord]) -> Result<(), StoreError> {
        self.update_many(records).await
    }

    async fn update(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.ephemeral_id.clone(), record.clone());
        Ok(())
    }

    async fn update_many(&self, records: &[AnnotationRecord]) -> Result<(), StoreError> {
        let mut stored = self.records.write().await;
        for record in records {
            stored.insert(record.ephemeral_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn remove(&self, id: &EphemeralId) -> Result<(), StoreError> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn remove_many(&self, ids: &[EphemeralId]) -> Result<(), StoreError> {
        let mut stored = self.records.write().await;
        for id in ids {
            stored.remove(id);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemorySettings {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            entries: Mutex::new(entries),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
