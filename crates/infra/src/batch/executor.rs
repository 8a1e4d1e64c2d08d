//! `JobHandler` that runs fired batch jobs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use geoip_core::BatchJob;

use crate::jobs::{JobContext, JobExecutionError, JobHandler};

use super::orchestrator::BatchOrchestrator;

#[derive(Debug, Clone)]
pub struct BatchExecutor {
    orchestrator: Arc<BatchOrchestrator>,
}

impl BatchExecutor {
    pub fn new(orchestrator: Arc<BatchOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl JobHandler for BatchExecutor {
    async fn execute(&self, ctx: JobContext) -> Result<(), JobExecutionError> {
        // A bad payload will never get better; finish the job instead of refiring.
        let batch = match BatchJob::from_payload(&ctx.payload) {
            Ok(batch) => batch,
            Err(err) => {
                error!(job = %ctx.key, error = %err, "discarding batch job");
                return Ok(());
            }
        };

        info!(job = %ctx.key, batch_id = %batch.batch_id, total = batch.total(), "batch job fired");
        self.orchestrator
            .run(batch.batch_id, &batch.ip_addresses)
            .await
            .map(|_| ())
            .map_err(|e| JobExecutionError::fatal(format!("batch {} failed: {e}", batch.batch_id)))
    }
}
