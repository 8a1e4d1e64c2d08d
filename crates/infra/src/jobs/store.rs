//! Job storage: the durable side of the scheduling substrate.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use super::types::{Job, JobKey, JobStatus};

/// Job store abstraction.
///
/// Jobs are addressed by [`JobKey`]. A claimed job stays in the store while it
/// runs; deleting it only prevents future claims.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Register a new job. Fails with `AlreadyExists` when the key is taken.
    async fn register(&self, job: Job) -> Result<JobKey, JobStoreError>;

    async fn get(&self, key: &JobKey) -> Result<Option<Job>, JobStoreError>;

    /// Remove a job. Returns `false` when no such job exists.
    async fn delete(&self, key: &JobKey) -> Result<bool, JobStoreError>;

    /// Keys of every job in `group`, in registration order.
    async fn list_keys(&self, group: &str) -> Result<Vec<JobKey>, JobStoreError>;

    /// Claim the oldest ready `Pending` job whose type is in `job_types`,
    /// marking it `Running`. Returns `None` when nothing is ready.
    async fn claim_next(&self, job_types: &[String]) -> Result<Option<Job>, JobStoreError>;

    /// Overwrite a stored job. Fails with `NotFound` if it was deleted.
    async fn update(&self, job: &Job) -> Result<(), JobStoreError>;
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn register(&self, job: Job) -> Result<JobKey, JobStoreError> {
        (**self).register(job).await
    }

    async fn get(&self, key: &JobKey) -> Result<Option<Job>, JobStoreError> {
        (**self).get(key).await
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, JobStoreError> {
        (**self).delete(key).await
    }

    async fn list_keys(&self, group: &str) -> Result<Vec<JobKey>, JobStoreError> {
        (**self).list_keys(group).await
    }

    async fn claim_next(&self, job_types: &[String]) -> Result<Option<Job>, JobStoreError> {
        (**self).claim_next(job_types).await
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        (**self).update(job).await
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobKey),
    #[error("job already exists: {0}")]
    AlreadyExists(JobKey),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobKey, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn poisoned() -> JobStoreError {
        JobStoreError::Storage("job store lock poisoned".to_string())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn register(&self, job: Job) -> Result<JobKey, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        if jobs.contains_key(&job.key) {
            return Err(JobStoreError::AlreadyExists(job.key));
        }
        let key = job.key.clone();
        jobs.insert(key.clone(), job);
        Ok(key)
    }

    async fn get(&self, key: &JobKey) -> Result<Option<Job>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        Ok(jobs.get(key).cloned())
    }

    async fn delete(&self, key: &JobKey) -> Result<bool, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        Ok(jobs.remove(key).is_some())
    }

    async fn list_keys(&self, group: &str) -> Result<Vec<JobKey>, JobStoreError> {
        let jobs = self.jobs.read().map_err(|_| Self::poisoned())?;
        let mut in_group: Vec<&Job> = jobs.values().filter(|j| j.key.group == group).collect();
        in_group.sort_by_key(|j| j.created_at);
        Ok(in_group.into_iter().map(|j| j.key.clone()).collect())
    }

    async fn claim_next(&self, job_types: &[String]) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        let now = Utc::now();

        let next = jobs
            .values()
            .filter(|j| j.is_ready(now) && job_types.iter().any(|t| *t == j.job_type))
            .min_by_key(|j| (j.run_at, j.created_at))
            .map(|j| j.key.clone());

        Ok(next.and_then(|key| {
            jobs.get_mut(&key).map(|job| {
                job.mark_running();
                job.clone()
            })
        }))
    }

    async fn update(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(|_| Self::poisoned())?;
        match jobs.get_mut(&job.key) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.key.clone())),
        }
    }
}

impl InMemoryJobStore {
    /// Number of stored jobs currently in `status` (compared by variant).
    pub fn count_by_status(&self, status: &JobStatus) -> usize {
        self.jobs
            .read()
            .map(|jobs| {
                jobs.values()
                    .filter(|j| std::mem::discriminant(&j.status) == std::mem::discriminant(status))
                    .count()
            })
            .unwrap_or(0)
    }
}
