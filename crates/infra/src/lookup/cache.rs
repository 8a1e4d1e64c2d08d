//! Fast cache in front of the record store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use geoip_core::GeoRecord;

pub const CACHE_KEY_PREFIX: &str = "geoip:";

/// Cache key for an address in canonical form.
pub fn cache_key(ip: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{ip}")
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache serialization error: {0}")]
    Serialization(String),
}

#[async_trait]
pub trait GeoCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<GeoRecord>, CacheError>;
    async fn set(&self, key: &str, record: &GeoRecord, ttl: Duration) -> Result<(), CacheError>;
}

/// Process-local cache for tests/dev. Expired entries are swept on every write.
#[derive(Debug, Default)]
pub struct InMemoryGeoCache {
    entries: Mutex<HashMap<String, (GeoRecord, Instant)>>,
}

impl InMemoryGeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut entries = self.lock()?;
        Ok(Self::sweep(&mut entries, Instant::now()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, (GeoRecord, Instant)>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Backend("cache lock poisoned".to_string()))
    }

    fn sweep(entries: &mut HashMap<String, (GeoRecord, Instant)>, now: Instant) -> usize {
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.len()
    }
}

#[async_trait]
impl GeoCache for InMemoryGeoCache {
    async fn get(&self, key: &str) -> Result<Option<GeoRecord>, CacheError> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let hit = entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(record, _)| record.clone());
        if hit.is_none() {
            entries.remove(key);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, record: &GeoRecord, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        Self::sweep(&mut entries, now);
        entries.insert(key.to_string(), (record.clone(), now + ttl));
        Ok(())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_cache::RedisGeoCache;

#[cfg(feature = "redis")]
mod redis_cache {
    use super::*;
    use redis::aio::ConnectionManager;

    /// Records stored as JSON strings with `SET .. EX`.
    #[derive(Clone)]
    pub struct RedisGeoCache {
        conn: ConnectionManager,
    }

    impl std::fmt::Debug for RedisGeoCache {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisGeoCache").finish_non_exhaustive()
        }
    }

    impl RedisGeoCache {
        pub async fn connect(url: &str) -> Result<Self, CacheError> {
            let client = redis::Client::open(url).map_err(|e| CacheError::Backend(e.to_string()))?;
            let conn = ConnectionManager::new(client)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            Ok(Self { conn })
        }

        pub fn from_manager(conn: ConnectionManager) -> Self {
            Self { conn }
        }
    }

    #[async_trait]
    impl GeoCache for RedisGeoCache {
        async fn get(&self, key: &str) -> Result<Option<GeoRecord>, CacheError> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = redis::cmd("GET")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            raw.map(|json| {
                serde_json::from_str(&json).map_err(|e| CacheError::Serialization(e.to_string()))
            })
            .transpose()
        }

        async fn set(&self, key: &str, record: &GeoRecord, ttl: Duration) -> Result<(), CacheError> {
            let json =
                serde_json::to_string(record).map_err(|e| CacheError::Serialization(e.to_string()))?;
            let mut conn = self.conn.clone();
            redis::cmd("SET")
                .arg(key)
                .arg(json)
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))
        }
    }
}
