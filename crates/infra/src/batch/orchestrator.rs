//! Bounded-concurrency fan-out of one batch over the lookup resolver.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use geoip_core::{BatchId, GeoResult};

use crate::lookup::LookupResolver;
use crate::progress::ProgressStore;

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    resolver: LookupResolver,
    progress: ProgressStore,
    concurrency: usize,
}

impl BatchOrchestrator {
    pub fn new(resolver: LookupResolver, progress: ProgressStore, concurrency: usize) -> Self {
        Self {
            resolver,
            progress,
            concurrency: concurrency.max(1),
        }
    }

    /// Attempt every address with at most `concurrency` lookups in flight.
    ///
    /// Per-address failures are logged and counted; only failing to publish
    /// the `Processing` or `Completed` status aborts the run.
    #[instrument(skip(self, addresses), fields(batch_id = %batch_id, total = addresses.len()), err)]
    pub async fn run(&self, batch_id: BatchId, addresses: &[String]) -> GeoResult<BatchOutcome> {
        let total = addresses.len() as u64;
        self.progress.mark_processing(batch_id).await?;

        let addresses: Arc<[String]> = addresses.into();
        let cursor = Arc::new(AtomicUsize::new(0));
        let succeeded = Arc::new(AtomicU64::new(0));
        let workers = self.concurrency.min(addresses.len());

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let addresses = addresses.clone();
            let cursor = cursor.clone();
            let succeeded = succeeded.clone();
            let resolver = self.resolver.clone();
            let progress = self.progress.clone();

            pool.spawn(async move {
                loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(address) = addresses.get(index) else {
                        break;
                    };

                    match resolver.resolve(address).await {
                        Ok(_) => {
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => {
                            warn!(batch_id = %batch_id, worker, ip = %address, %error, "lookup failed");
                        }
                    }

                    if let Err(error) = progress.increment(batch_id).await {
                        warn!(batch_id = %batch_id, ip = %address, %error, "failed to record progress");
                    }
                }
            });
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(batch_id = %batch_id, error = %e, "batch worker aborted");
            }
        }

        self.progress.complete(batch_id, total).await?;

        let succeeded = succeeded.load(Ordering::Relaxed);
        let outcome = BatchOutcome {
            total,
            succeeded,
            failed: total.saturating_sub(succeeded),
        };
        info!(
            batch_id = %batch_id,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "batch completed"
        );
        Ok(outcome)
    }
}
