//! Key-value side channel for progress records.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use geoip_core::{BatchStatus, GeoError};

/// Flat field map stored under one key.
pub type ProgressFields = HashMap<String, String>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProgressError {
    #[error("progress backend error: {0}")]
    Backend(String),
    #[error("corrupt progress record {key}: {reason}")]
    Corrupt { key: String, reason: String },
    #[error("progress record {key} cannot move from {from} to {to}")]
    InvalidTransition {
        key: String,
        from: BatchStatus,
        to: BatchStatus,
    },
}

impl From<ProgressError> for GeoError {
    fn from(err: ProgressError) -> Self {
        GeoError::storage(err.to_string())
    }
}

/// Hash-like records with field updates, atomic counters and expiry.
///
/// Every write carries the record's TTL and resets its expiry.
#[async_trait]
pub trait ProgressBackend: Send + Sync {
    /// Replace whatever is stored under `key` with `fields`.
    async fn create(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), ProgressError>;

    /// Atomically add one to an integer field (missing counts as 0).
    async fn increment(&self, key: &str, field: &str, ttl: Duration)
        -> Result<i64, ProgressError>;

    /// Overwrite individual fields, leaving the others untouched.
    async fn set_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), ProgressError>;

    /// All fields under `key`, or `None` when absent or expired.
    async fn read(&self, key: &str) -> Result<Option<ProgressFields>, ProgressError>;

    /// Reset the expiry of `key`. A zero TTL removes it. Returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ProgressError>;
}

#[derive(Debug)]
struct Entry {
    fields: ProgressFields,
    expires_at: Instant,
}

/// In-process backend for tests/dev. Expired entries are evicted lazily.
#[derive(Debug, Default)]
pub struct InMemoryProgressBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryProgressBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included until evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired record. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, ProgressError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        Ok(before - entries.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, ProgressError> {
        self.entries
            .lock()
            .map_err(|_| ProgressError::Backend("progress map lock poisoned".to_string()))
    }

    /// Live entry for `key`, evicting it first if it has expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    /// Live entry for `key`, starting an empty one when absent or expired.
    fn live_or_empty<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> &'a mut Entry {
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        entries.entry(key.to_string()).or_insert_with(|| Entry {
            fields: ProgressFields::new(),
            expires_at: now,
        })
    }
}

#[async_trait]
impl ProgressBackend for InMemoryProgressBackend {
    async fn create(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), ProgressError> {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.lock()?.insert(
            key.to_string(),
            Entry {
                fields,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        field: &str,
        ttl: Duration,
    ) -> Result<i64, ProgressError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let entry = Self::live_or_empty(&mut entries, key, now);

        let current = match entry.fields.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|e| ProgressError::Corrupt {
                key: key.to_string(),
                reason: format!("{field} is not an integer: {e}"),
            })?,
            None => 0,
        };
        let next = current + 1;
        entry.fields.insert(field.to_string(), next.to_string());
        entry.expires_at = now + ttl;
        Ok(next)
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), ProgressError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let entry = Self::live_or_empty(&mut entries, key, now);
        for (k, v) in fields {
            entry.fields.insert(k.to_string(), v.clone());
        }
        entry.expires_at = now + ttl;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<ProgressFields>, ProgressError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        Ok(Self::live(&mut entries, key, now).map(|e| e.fields.clone()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ProgressError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        if ttl.is_zero() {
            return Ok(entries.remove(key).is_some_and(|e| e.expires_at > now));
        }
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
