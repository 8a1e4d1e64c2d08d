//! Batch submission, cancellation and listing on top of the job substrate.

use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use geoip_core::{filter_valid, BatchId, BatchJob, BatchProgress, GeoError, GeoResult};

use crate::jobs::{Job, JobKey, JobStore};
use crate::progress::ProgressStore;

/// Group every batch job is registered under.
pub const BATCH_JOB_GROUP: &str = "geoip-batches";
/// Job type the batch executor is registered for.
pub const BATCH_JOB_TYPE: &str = "geoip.batch";
const JOB_NAME_PREFIX: &str = "batch-";

pub fn job_key(batch_id: BatchId) -> JobKey {
    JobKey::new(BATCH_JOB_GROUP, format!("{JOB_NAME_PREFIX}{batch_id}"))
}

#[derive(Clone)]
pub struct BatchJobScheduler {
    jobs: Arc<dyn JobStore>,
    progress: ProgressStore,
}

impl std::fmt::Debug for BatchJobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJobScheduler")
            .field("progress", &self.progress)
            .finish_non_exhaustive()
    }
}

impl BatchJobScheduler {
    pub fn new(jobs: Arc<dyn JobStore>, progress: ProgressStore) -> Self {
        Self { jobs, progress }
    }

    /// Queue the valid addresses of `addresses` as one batch and return its id
    /// without waiting for execution.
    #[instrument(skip(self, addresses), fields(submitted = addresses.len()), err)]
    pub async fn submit(&self, addresses: &[String]) -> GeoResult<BatchId> {
        let valid = filter_valid(addresses);
        if valid.is_empty() {
            return Err(GeoError::invalid_input("no valid IP addresses were provided"));
        }

        let batch = BatchJob::new(valid);
        let batch_id = batch.batch_id;
        let payload = batch.to_payload()?;

        // Seeded first so a fast executor always finds the record.
        self.progress.create(batch_id, batch.total()).await?;

        let job = Job::new(job_key(batch_id), BATCH_JOB_TYPE, payload);
        if let Err(err) = self.jobs.register(job).await {
            if let Err(cleanup) = self.progress.discard(batch_id).await {
                warn!(batch_id = %batch_id, error = %cleanup, "failed to discard progress of unscheduled batch");
            }
            return Err(GeoError::scheduler(err.to_string()));
        }

        info!(batch_id = %batch_id, total = batch.total(), "batch scheduled");
        Ok(batch_id)
    }

    /// Best effort: `false` when the job is unknown or the store fails.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn cancel(&self, batch_id: BatchId) -> bool {
        match self.jobs.delete(&job_key(batch_id)).await {
            Ok(deleted) => {
                debug!(deleted, "batch cancel requested");
                deleted
            }
            Err(error) => {
                warn!(%error, "failed to cancel batch");
                false
            }
        }
    }

    /// Ids of the batches still held by the job store.
    pub async fn list_scheduled(&self) -> GeoResult<Vec<BatchId>> {
        let keys = self
            .jobs
            .list_keys(BATCH_JOB_GROUP)
            .await
            .map_err(|e| GeoError::scheduler(e.to_string()))?;

        Ok(keys
            .iter()
            .filter_map(|key| {
                let id = key.name.strip_prefix(JOB_NAME_PREFIX)?;
                BatchId::from_str(id)
                    .inspect_err(|_| debug!(job = %key, "skipping foreign job name"))
                    .ok()
            })
            .collect())
    }

    pub async fn progress(&self, batch_id: BatchId) -> GeoResult<Option<BatchProgress>> {
        Ok(self.progress.read(batch_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use geoip_core::BatchStatus;

    use crate::jobs::{InMemoryJobStore, JobStoreError};
    use crate::progress::InMemoryProgressBackend;

    fn scheduler() -> (BatchJobScheduler, Arc<InMemoryJobStore>) {
        let jobs = InMemoryJobStore::arc();
        let progress = ProgressStore::new(
            Arc::new(InMemoryProgressBackend::new()),
            Duration::from_secs(3600),
        );
        (BatchJobScheduler::new(jobs.clone(), progress), jobs)
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn submit_seeds_queued_progress_and_registers_job() {
        let (scheduler, jobs) = scheduler();
        let id = scheduler
            .submit(&strings(&["192.168.1.1", "bogus", "10.0.0.1"]))
            .await
            .unwrap();

        let progress = scheduler.progress(id).await.unwrap().unwrap();
        assert_eq!(progress.status, BatchStatus::Queued);
        assert_eq!(progress.total, 2);
        assert_eq!(progress.processed, 0);

        let job = jobs.get(&job_key(id)).await.unwrap().unwrap();
        assert_eq!(job.job_type, BATCH_JOB_TYPE);
        let payload = BatchJob::from_payload(&job.payload).unwrap();
        assert_eq!(payload.batch_id, id);
        assert_eq!(payload.ip_addresses, strings(&["192.168.1.1", "10.0.0.1"]));
    }

    #[tokio::test]
    async fn no_valid_address_creates_nothing() {
        let backend = Arc::new(InMemoryProgressBackend::new());
        let jobs = InMemoryJobStore::arc();
        let scheduler = BatchJobScheduler::new(
            jobs,
            ProgressStore::new(backend.clone(), Duration::from_secs(3600)),
        );

        let err = scheduler.submit(&strings(&["not-an-ip", ""])).await.unwrap_err();
        assert!(matches!(err, GeoError::InvalidInput(_)));
        assert!(scheduler.list_scheduled().await.unwrap().is_empty());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn list_and_cancel() {
        let (scheduler, _) = scheduler();
        let a = scheduler.submit(&strings(&["1.1.1.1"])).await.unwrap();
        let b = scheduler.submit(&strings(&["8.8.8.8"])).await.unwrap();
        let listed = scheduler.list_scheduled().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.contains(&a) && listed.contains(&b));

        assert!(scheduler.cancel(a).await);
        assert!(!scheduler.cancel(a).await);
        assert!(!scheduler.cancel(BatchId::new()).await);
        assert_eq!(scheduler.list_scheduled().await.unwrap(), vec![b]);
    }

    struct RejectingStore;

    #[async_trait]
    impl JobStore for RejectingStore {
        async fn register(&self, job: Job) -> Result<JobKey, JobStoreError> {
            Err(JobStoreError::AlreadyExists(job.key))
        }
        async fn get(&self, _: &JobKey) -> Result<Option<Job>, JobStoreError> {
            Ok(None)
        }
        async fn delete(&self, _: &JobKey) -> Result<bool, JobStoreError> {
            Err(JobStoreError::Storage("down".into()))
        }
        async fn list_keys(&self, _: &str) -> Result<Vec<JobKey>, JobStoreError> {
            Ok(Vec::new())
        }
        async fn claim_next(&self, _: &[String]) -> Result<Option<Job>, JobStoreError> {
            Ok(None)
        }
        async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
            Err(JobStoreError::NotFound(job.key.clone()))
        }
    }

    #[tokio::test]
    async fn failed_registration_discards_progress() {
        let backend = Arc::new(InMemoryProgressBackend::new());
        let progress = ProgressStore::new(backend.clone(), Duration::from_secs(3600));
        let scheduler = BatchJobScheduler::new(Arc::new(RejectingStore), progress);

        let err = scheduler.submit(&strings(&["1.1.1.1"])).await.unwrap_err();
        assert!(matches!(err, GeoError::SchedulerFailure(_)));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn cancel_swallows_store_failures() {
        let progress = ProgressStore::new(
            Arc::new(InMemoryProgressBackend::new()),
            Duration::from_secs(3600),
        );
        let scheduler = BatchJobScheduler::new(Arc::new(RejectingStore), progress);
        assert!(!scheduler.cancel(BatchId::new()).await);
    }
}
