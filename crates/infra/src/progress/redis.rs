//! Redis-backed progress records.
//!
//! Each record is a Redis hash. Multi-step writes (replace, increment + TTL)
//! go through `MULTI`/`EXEC` pipelines so a reader never sees a record
//! without its expiry.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::instrument;

use super::backend::{ProgressBackend, ProgressError, ProgressFields};

#[derive(Clone)]
pub struct RedisProgressBackend {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisProgressBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisProgressBackend").finish_non_exhaustive()
    }
}

impl RedisProgressBackend {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self, ProgressError> {
        let client = redis::Client::open(url).map_err(backend_error)?;
        let conn = ConnectionManager::new(client).await.map_err(backend_error)?;
        Ok(Self { conn })
    }

    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn backend_error(e: redis::RedisError) -> ProgressError {
    ProgressError::Backend(e.to_string())
}

/// Whole seconds, never below one so a live record is not deleted by EXPIRE 0.
fn ttl_secs(ttl: Duration) -> i64 {
    ttl.as_secs().max(1) as i64
}

#[async_trait]
impl ProgressBackend for RedisProgressBackend {
    #[instrument(skip(self, fields), err)]
    async fn create(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), ProgressError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        if !fields.is_empty() {
            pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                pipe.arg(*field).arg(value);
            }
            pipe.ignore();
        }
        pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).ignore();

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend_error)
    }

    async fn increment(
        &self,
        key: &str,
        field: &str,
        ttl: Duration,
    ) -> Result<i64, ProgressError> {
        let mut conn = self.conn.clone();
        let (value,): (i64,) = redis::pipe()
            .atomic()
            .cmd("HINCRBY")
            .arg(key)
            .arg(field)
            .arg(1)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        Ok(value)
    }

    async fn set_fields(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Duration,
    ) -> Result<(), ProgressError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        if !fields.is_empty() {
            pipe.cmd("HSET").arg(key);
            for (field, value) in fields {
                pipe.arg(*field).arg(value);
            }
            pipe.ignore();
        }
        pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).ignore();

        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(backend_error)
    }

    async fn read(&self, key: &str) -> Result<Option<ProgressFields>, ProgressError> {
        let mut conn = self.conn.clone();
        let fields: ProgressFields = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        Ok((!fields.is_empty()).then_some(fields))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, ProgressError> {
        let mut conn = self.conn.clone();
        let affected: i64 = if ttl.is_zero() {
            redis::cmd("DEL").arg(key).query_async::<_, i64>(&mut conn).await
        } else {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(ttl_secs(ttl))
                .query_async::<_, i64>(&mut conn)
                .await
        }
        .map_err(backend_error)?;
        Ok(affected > 0)
    }
}
