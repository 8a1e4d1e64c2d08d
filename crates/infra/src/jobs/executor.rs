//! Polling job executor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobKey, JobStatus};

/// What a handler sees of the job it runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub key: JobKey,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
}

impl From<&Job> for JobContext {
    fn from(job: &Job) -> Self {
        Self {
            key: job.key.clone(),
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            attempt: job.attempt,
        }
    }
}

/// Failure reported by a handler.
///
/// `refire` asks the executor to run the job again if its retry policy allows.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct JobExecutionError {
    message: String,
    refire: bool,
}

impl JobExecutionError {
    /// A failure that must not be retried.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            refire: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            refire: true,
        }
    }

    pub fn refire(&self) -> bool {
        self.refire
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, ctx: JobContext) -> Result<(), JobExecutionError>;
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How long to sleep when no job is ready
    pub poll_interval: Duration,
    /// Maximum jobs running at once
    pub max_concurrent: usize,
    /// Name for logging
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_concurrent: 10,
            name: "job-executor".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// Handle to control a running executor. Dropping it stops polling.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Stop claiming new jobs and wait for running ones to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                error!(error = %e, "job executor task failed");
            }
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        match self.stats.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub jobs_refired: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

impl ExecutorStats {
    fn record(&mut self, outcome: &Result<JobOutcome, JobStoreError>) {
        self.current_running = self.current_running.saturating_sub(1);
        self.jobs_processed += 1;
        match outcome {
            Ok(JobOutcome::Succeeded) => self.jobs_succeeded += 1,
            Ok(JobOutcome::Refired) => self.jobs_refired += 1,
            Ok(JobOutcome::Failed(_)) | Err(_) => self.jobs_failed += 1,
        }
    }
}

/// Result of running one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// Failed and put back to `Pending` for another attempt
    Refired,
    Failed(String),
}

/// Background job executor.
///
/// Claims ready jobs from a [`JobStore`], runs them through the handler
/// registered for their type, and writes the outcome back.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    retain_completed: bool,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            retain_completed: false,
        }
    }

    /// Keep successful jobs in the store as `Completed` instead of deleting them.
    pub fn retain_completed(mut self, retain: bool) -> Self {
        self.retain_completed = retain;
        self
    }

    /// Register the handler for one job type. Only registered types are claimed.
    pub fn register_handler(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    fn claimable_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Spawn the polling loop on the current tokio runtime.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));

        let join = tokio::spawn(executor_loop(
            Arc::new(self),
            config,
            shutdown_rx,
            stats.clone(),
        ));

        JobExecutorHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    /// Run one already-claimed job and persist its outcome.
    pub async fn execute_one(&self, mut job: Job) -> Result<JobOutcome, JobStoreError> {
        let started = Utc::now();

        let result = match self.handlers.get(&job.job_type).cloned() {
            Some(handler) => {
                let ctx = JobContext::from(&job);
                match tokio::spawn(async move { handler.execute(ctx).await }).await {
                    Ok(result) => result,
                    Err(e) => Err(JobExecutionError::fatal(format!("job handler panicked: {e}"))),
                }
            }
            None => {
                warn!(job = %job.key, job_type = %job.job_type, "no handler for job");
                Err(JobExecutionError::fatal(format!(
                    "no handler for job type: {}",
                    job.job_type
                )))
            }
        };

        match result {
            Ok(()) => {
                job.mark_completed(started);
                if self.retain_completed {
                    self.persist(&job).await?;
                } else {
                    self.store.delete(&job.key).await?;
                }
                debug!(job = %job.key, "job completed successfully");
                Ok(JobOutcome::Succeeded)
            }
            Err(e) => {
                job.mark_failed(e.message().to_string(), e.refire(), started);
                self.persist(&job).await?;
                if job.status == JobStatus::Pending {
                    debug!(job = %job.key, attempt = job.attempt, error = %e, "job will be refired");
                    Ok(JobOutcome::Refired)
                } else {
                    Ok(JobOutcome::Failed(e.message().to_string()))
                }
            }
        }
    }

    /// A job deleted while running has nothing left to update.
    async fn persist(&self, job: &Job) -> Result<(), JobStoreError> {
        match self.store.update(job).await {
            Err(JobStoreError::NotFound(key)) => {
                debug!(job = %key, "job was deleted while running; outcome dropped");
                Ok(())
            }
            other => other,
        }
    }
}

async fn executor_loop(
    executor: Arc<JobExecutor>,
    config: JobExecutorConfig,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, max_concurrent = config.max_concurrent, "job executor started");
    let start_time = Instant::now();
    let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let job_types = executor.claimable_types();
    let mut running = JoinSet::new();

    loop {
        while let Some(joined) = running.try_join_next() {
            if let Err(e) = joined {
                error!(executor = %config.name, error = %e, "job task aborted");
            }
        }

        if let Ok(mut s) = stats.lock() {
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        let permit = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        match executor.store.claim_next(&job_types).await {
            Ok(Some(job)) => {
                debug!(
                    executor = %config.name,
                    job = %job.key,
                    job_type = %job.job_type,
                    attempt = job.attempt,
                    "claimed job"
                );
                if let Ok(mut s) = stats.lock() {
                    s.current_running += 1;
                }

                let executor = executor.clone();
                let stats = stats.clone();
                let name = config.name.clone();
                running.spawn(async move {
                    let _permit = permit;
                    let key = job.key.clone();
                    let outcome = executor.execute_one(job).await;

                    match &outcome {
                        Ok(JobOutcome::Failed(reason)) => {
                            warn!(executor = %name, job = %key, error = %reason, "job failed")
                        }
                        Err(e) => {
                            error!(executor = %name, job = %key, error = %e, "failed to record job outcome")
                        }
                        Ok(_) => {}
                    }
                    if let Ok(mut s) = stats.lock() {
                        s.record(&outcome);
                    }
                });
            }
            Ok(None) => {
                drop(permit);
                if idle(&mut shutdown, config.poll_interval).await {
                    break;
                }
            }
            Err(e) => {
                drop(permit);
                error!(executor = %config.name, error = %e, "failed to claim job");
                if idle(&mut shutdown, config.poll_interval).await {
                    break;
                }
            }
        }
    }

    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            error!(executor = %config.name, error = %e, "job task aborted during shutdown");
        }
    }
    info!(executor = %config.name, "job executor stopped");
}

/// Sleep for `interval`; `true` when shutdown was requested meanwhile.
async fn idle(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = tokio::time::sleep(interval) => false,
    }
}
