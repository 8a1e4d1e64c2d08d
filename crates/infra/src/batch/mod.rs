//! Batch geolocation pipeline.
//!
//! `BatchJobScheduler` turns a submitted address list into a durable job and
//! a `Queued` progress record. When the job fires, `BatchExecutor` decodes it
//! and hands the addresses to `BatchOrchestrator`, which resolves them with a
//! bounded worker pool and publishes progress as results land.

pub mod executor;
pub mod orchestrator;
pub mod scheduler;

pub use executor::BatchExecutor;
pub use orchestrator::{BatchOrchestrator, BatchOutcome};
pub use scheduler::{job_key, BatchJobScheduler, BATCH_JOB_GROUP, BATCH_JOB_TYPE};
