//! Batch progress protocol over a [`ProgressBackend`].
//!
//! Record layout under `geoip:batch:{id}`:
//!
//! | field           | value                                   |
//! |-----------------|-----------------------------------------|
//! | `batchId`       | batch id                                |
//! | `status`        | `Queued` / `Processing` / `Completed`   |
//! | `total`         | number of addresses                     |
//! | `processed`     | addresses attempted so far              |
//! | `startTime`     | RFC 3339                                |
//! | `completedTime` | RFC 3339, only once `Completed`         |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use geoip_core::{BatchId, BatchProgress, BatchStatus};

use super::backend::{ProgressBackend, ProgressError, ProgressFields};

pub const PROGRESS_KEY_PREFIX: &str = "geoip:batch:";

const FIELD_BATCH_ID: &str = "batchId";
const FIELD_STATUS: &str = "status";
const FIELD_TOTAL: &str = "total";
const FIELD_PROCESSED: &str = "processed";
const FIELD_START_TIME: &str = "startTime";
const FIELD_COMPLETED_TIME: &str = "completedTime";

#[derive(Clone)]
pub struct ProgressStore {
    backend: Arc<dyn ProgressBackend>,
    ttl: Duration,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore").field("ttl", &self.ttl).finish()
    }
}

impl ProgressStore {
    /// `ttl` is the retention window, refreshed on every write.
    pub fn new(backend: Arc<dyn ProgressBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn key(batch_id: BatchId) -> String {
        format!("{PROGRESS_KEY_PREFIX}{batch_id}")
    }

    /// Seed a `Queued` record with `processed = 0`.
    #[instrument(skip(self, batch_id), fields(batch_id = %batch_id), err)]
    pub async fn create(&self, batch_id: BatchId, total: u64) -> Result<BatchProgress, ProgressError> {
        let progress = BatchProgress::queued(batch_id, total, Utc::now());
        let fields = [
            (FIELD_BATCH_ID, batch_id.to_string()),
            (FIELD_STATUS, progress.status.as_str().to_string()),
            (FIELD_TOTAL, total.to_string()),
            (FIELD_PROCESSED, "0".to_string()),
            (FIELD_START_TIME, progress.start_time.to_rfc3339()),
        ];
        self.backend
            .create(&Self::key(batch_id), &fields, self.ttl)
            .await?;
        Ok(progress)
    }

    /// Atomically bump `processed` and republish `Processing`.
    pub async fn increment(&self, batch_id: BatchId) -> Result<u64, ProgressError> {
        let key = Self::key(batch_id);
        let processed = self
            .backend
            .increment(&key, FIELD_PROCESSED, self.ttl)
            .await?;
        self.backend
            .set_fields(
                &key,
                &[(FIELD_STATUS, BatchStatus::Processing.as_str().to_string())],
                self.ttl,
            )
            .await?;
        Ok(processed.max(0) as u64)
    }

    /// Publish `status` together with any `extra` fields.
    ///
    /// Status only moves forward; moving a live record backwards is rejected.
    pub async fn set_status(
        &self,
        batch_id: BatchId,
        status: BatchStatus,
        extra: &[(&str, String)],
    ) -> Result<(), ProgressError> {
        let key = Self::key(batch_id);
        let current = self
            .backend
            .read(&key)
            .await?
            .and_then(|fields| fields.get(FIELD_STATUS)?.parse::<BatchStatus>().ok());
        if let Some(current) = current.filter(|c| !c.can_transition_to(status)) {
            return Err(ProgressError::InvalidTransition {
                key,
                from: current,
                to: status,
            });
        }

        let mut fields = Vec::with_capacity(extra.len() + 1);
        fields.push((FIELD_STATUS, status.as_str().to_string()));
        fields.extend(extra.iter().cloned());
        self.backend.set_fields(&key, &fields, self.ttl).await?;
        debug!(batch_id = %batch_id, status = %status, "batch status published");
        Ok(())
    }

    /// Mark the run as started with nothing processed yet.
    pub async fn mark_processing(&self, batch_id: BatchId) -> Result<(), ProgressError> {
        self.set_status(
            batch_id,
            BatchStatus::Processing,
            &[(FIELD_PROCESSED, "0".to_string())],
        )
        .await
    }

    /// Mark the run finished: `processed = total`, completion time now.
    pub async fn complete(&self, batch_id: BatchId, total: u64) -> Result<DateTime<Utc>, ProgressError> {
        let completed_at = Utc::now();
        self.set_status(
            batch_id,
            BatchStatus::Completed,
            &[
                (FIELD_PROCESSED, total.to_string()),
                (FIELD_COMPLETED_TIME, completed_at.to_rfc3339()),
            ],
        )
        .await?;
        Ok(completed_at)
    }

    /// The current record, or `None` when unknown or expired.
    pub async fn read(&self, batch_id: BatchId) -> Result<Option<BatchProgress>, ProgressError> {
        let key = Self::key(batch_id);
        match self.backend.read(&key).await? {
            Some(fields) => decode(&key, batch_id, &fields),
            None => Ok(None),
        }
    }

    /// Remove the record immediately.
    pub async fn discard(&self, batch_id: BatchId) -> Result<bool, ProgressError> {
        self.backend.expire(&Self::key(batch_id), Duration::ZERO).await
    }
}

/// A record missing any required field (half-written or half-expired) reads as absent.
fn decode(
    key: &str,
    batch_id: BatchId,
    fields: &ProgressFields,
) -> Result<Option<BatchProgress>, ProgressError> {
    let required = [
        FIELD_BATCH_ID,
        FIELD_STATUS,
        FIELD_TOTAL,
        FIELD_PROCESSED,
        FIELD_START_TIME,
    ];
    if required.iter().any(|f| !fields.contains_key(*f)) {
        debug!(key, "incomplete progress record treated as absent");
        return Ok(None);
    }

    let corrupt = |reason: String| ProgressError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let field = |name: &str| fields.get(name).map(String::as_str).unwrap_or_default();
    let timestamp = |name: &str| {
        DateTime::parse_from_rfc3339(field(name))
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("{name}: {e}")))
    };

    let status = field(FIELD_STATUS)
        .parse::<BatchStatus>()
        .map_err(|e| corrupt(e.to_string()))?;
    let total = field(FIELD_TOTAL)
        .parse::<u64>()
        .map_err(|e| corrupt(format!("{FIELD_TOTAL}: {e}")))?;
    let processed = field(FIELD_PROCESSED)
        .parse::<u64>()
        .map_err(|e| corrupt(format!("{FIELD_PROCESSED}: {e}")))?;
    let start_time = timestamp(FIELD_START_TIME)?;
    let completed_time = match fields.get(FIELD_COMPLETED_TIME) {
        Some(_) => Some(timestamp(FIELD_COMPLETED_TIME)?),
        None => None,
    };

    Ok(Some(BatchProgress {
        batch_id,
        status,
        total,
        processed,
        start_time,
        completed_time,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::backend::InMemoryProgressBackend;

    fn store() -> (ProgressStore, Arc<InMemoryProgressBackend>) {
        let backend = Arc::new(InMemoryProgressBackend::new());
        (
            ProgressStore::new(backend.clone(), Duration::from_secs(24 * 60 * 60)),
            backend,
        )
    }

    #[tokio::test]
    async fn create_then_read_is_queued() {
        let (store, _) = store();
        let id = BatchId::new();
        let created = store.create(id, 2).await.unwrap();

        let read = store.read(id).await.unwrap().unwrap();
        assert_eq!(read, created);
        assert_eq!(read.status, BatchStatus::Queued);
        assert_eq!(read.processed, 0);
        assert_eq!(read.total, 2);
        assert!(read.completed_time.is_none());
    }

    #[tokio::test]
    async fn unknown_batch_is_absent() {
        let (store, _) = store();
        assert!(store.read(BatchId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn increment_flips_to_processing() {
        let (store, _) = store();
        let id = BatchId::new();
        store.create(id, 3).await.unwrap();

        assert_eq!(store.increment(id).await.unwrap(), 1);
        assert_eq!(store.increment(id).await.unwrap(), 2);

        let read = store.read(id).await.unwrap().unwrap();
        assert_eq!(read.status, BatchStatus::Processing);
        assert_eq!(read.processed, 2);
    }

    #[tokio::test]
    async fn n_concurrent_increments_yield_n() {
        let (store, _) = store();
        let id = BatchId::new();
        store.create(id, 64).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..64 {
            let store = store.clone();
            tasks.spawn(async move { store.increment(id).await.unwrap() });
        }
        while let Some(res) = tasks.join_next().await {
            res.unwrap();
        }

        assert_eq!(store.read(id).await.unwrap().unwrap().processed, 64);
    }

    #[tokio::test]
    async fn complete_sets_full_count_and_timestamp() {
        let (store, _) = store();
        let id = BatchId::new();
        store.create(id, 2).await.unwrap();
        store.mark_processing(id).await.unwrap();
        store.increment(id).await.unwrap();
        let done_at = store.complete(id, 2).await.unwrap();

        let read = store.read(id).await.unwrap().unwrap();
        assert_eq!(read.status, BatchStatus::Completed);
        assert_eq!(read.processed, 2);
        assert_eq!(read.completed_time, Some(done_at));
        read.validate().unwrap();
    }

    #[tokio::test]
    async fn status_never_moves_backwards() {
        let (store, _) = store();
        let id = BatchId::new();
        store.create(id, 1).await.unwrap();
        store.mark_processing(id).await.unwrap();
        store.complete(id, 1).await.unwrap();

        let err = store.mark_processing(id).await.unwrap_err();
        assert!(matches!(
            err,
            ProgressError::InvalidTransition {
                from: BatchStatus::Completed,
                to: BatchStatus::Processing,
                ..
            }
        ));
        let err = store
            .set_status(id, BatchStatus::Queued, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::InvalidTransition { .. }));

        let read = store.read(id).await.unwrap().unwrap();
        assert_eq!(read.status, BatchStatus::Completed);
        assert_eq!(read.processed, 1);
        store.complete(id, 1).await.unwrap();
    }

    #[tokio::test]
    async fn partial_record_reads_as_absent() {
        let (store, backend) = store();
        let id = BatchId::new();
        backend
            .increment(&ProgressStore::key(id), FIELD_PROCESSED, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.read(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_fields_are_corrupt() {
        let (store, backend) = store();
        let id = BatchId::new();
        store.create(id, 2).await.unwrap();
        backend
            .set_fields(
                &ProgressStore::key(id),
                &[(FIELD_TOTAL, "lots".to_string())],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let err = store.read(id).await.unwrap_err();
        assert!(matches!(err, ProgressError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn discard_removes_record() {
        let (store, _) = store();
        let id = BatchId::new();
        store.create(id, 1).await.unwrap();
        assert!(store.discard(id).await.unwrap());
        assert!(store.read(id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn record_expires_after_retention_window() {
        let backend = Arc::new(InMemoryProgressBackend::new());
        let store = ProgressStore::new(backend, Duration::from_secs(24 * 60 * 60));
        let id = BatchId::new();
        store.create(id, 1).await.unwrap();

        tokio::time::advance(Duration::from_secs(23 * 60 * 60)).await;
        assert!(store.read(id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2 * 60 * 60)).await;
        assert!(store.read(id).await.unwrap().is_none());
    }
}
