//! Durable history of lookup results.

use std::sync::RwLock;

use async_trait::async_trait;

use geoip_core::{GeoError, GeoRecord, RecordId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RecordStoreError {
    #[error("record store error: {0}")]
    Storage(String),
}

impl From<RecordStoreError> for GeoError {
    fn from(err: RecordStoreError) -> Self {
        GeoError::storage(err.to_string())
    }
}

#[async_trait]
pub trait GeoRecordStore: Send + Sync {
    async fn insert(&self, record: &GeoRecord) -> Result<(), RecordStoreError>;

    async fn get(&self, id: RecordId) -> Result<Option<GeoRecord>, RecordStoreError>;

    /// Most recently created record for `ip`.
    async fn find_latest_by_ip(&self, ip: &str) -> Result<Option<GeoRecord>, RecordStoreError>;

    /// Up to `limit` records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<GeoRecord>, RecordStoreError>;
}

/// Append-only in-memory store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryGeoRecordStore {
    records: RwLock<Vec<GeoRecord>>,
}

impl InMemoryGeoRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> RecordStoreError {
        RecordStoreError::Storage("record store lock poisoned".to_string())
    }
}

#[async_trait]
impl GeoRecordStore for InMemoryGeoRecordStore {
    async fn insert(&self, record: &GeoRecord) -> Result<(), RecordStoreError> {
        let mut stored = record.clone();
        stored.is_from_cache = false;
        self.records
            .write()
            .map_err(|_| Self::poisoned())?
            .push(stored);
        Ok(())
    }

    async fn get(&self, id: RecordId) -> Result<Option<GeoRecord>, RecordStoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn find_latest_by_ip(&self, ip: &str) -> Result<Option<GeoRecord>, RecordStoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        Ok(records
            .iter()
            .filter(|r| r.ip_address == ip)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<GeoRecord>, RecordStoreError> {
        let records = self.records.read().map_err(|_| Self::poisoned())?;
        let mut newest: Vec<GeoRecord> = records.clone();
        newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        newest.truncate(limit);
        Ok(newest)
    }
}
