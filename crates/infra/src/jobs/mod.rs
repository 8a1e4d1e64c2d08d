//! Durable job-scheduling substrate.
//!
//! ## Design
//!
//! - Jobs are addressed by a `(group, name)` key and dispatched by job type
//! - One-shot by default; a `RetryPolicy` allows refires with a delay
//! - Failed jobs stay in the store with their error for inspection
//! - Successful jobs are deleted unless the executor retains them
//!
//! ## Components
//!
//! - `Job`: key, type, JSON payload and attempt history
//! - `JobStore`: persistence (in-memory or Postgres)
//! - `JobExecutor`: claims ready jobs and runs the matching `JobHandler`

pub mod executor;
pub mod postgres;
pub mod store;
pub mod types;

pub use executor::{
    ExecutorStats, JobContext, JobExecutionError, JobExecutor, JobExecutorConfig,
    JobExecutorHandle, JobHandler, JobOutcome,
};
pub use postgres::PostgresJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{Job, JobAttemptRecord, JobKey, JobStatus, RetryPolicy};
