//! Service wiring: stores, resolver, batch pipeline and the job executor.

use std::sync::Arc;

use geoip_infra::batch::{BatchExecutor, BatchJobScheduler, BatchOrchestrator, BATCH_JOB_TYPE};
use geoip_infra::jobs::{
    InMemoryJobStore, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobStore,
};
use geoip_infra::lookup::{
    GeoCache, GeoProvider, GeoRecordStore, InMemoryGeoCache, InMemoryGeoRecordStore,
    IpBaseClient, LookupResolver, ProviderError,
};
use geoip_infra::progress::{InMemoryProgressBackend, ProgressBackend, ProgressStore};
use geoip_infra::GeoConfig;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to build lookup provider: {0}")]
    Provider(#[from] ProviderError),
    #[error("failed to connect to Postgres: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to initialise {component}: {message}")]
    Backend {
        component: &'static str,
        message: String,
    },
}

/// Everything the handlers need, shared behind an `Arc`.
pub struct AppServices {
    pub resolver: LookupResolver,
    pub scheduler: BatchJobScheduler,
    jobs: Arc<dyn JobStore>,
    orchestrator: Arc<BatchOrchestrator>,
    config: GeoConfig,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("resolver", &self.resolver)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

struct Backends {
    cache: Arc<dyn GeoCache>,
    records: Arc<dyn GeoRecordStore>,
    progress: Arc<dyn ProgressBackend>,
    jobs: Arc<dyn JobStore>,
}

impl AppServices {
    /// In-memory wiring (dev/test) around an arbitrary provider.
    pub fn in_memory(config: &GeoConfig, provider: Arc<dyn GeoProvider>) -> Self {
        let jobs: Arc<dyn JobStore> = InMemoryJobStore::arc();
        Self::assemble(
            config,
            provider,
            Backends {
                cache: Arc::new(InMemoryGeoCache::new()),
                records: Arc::new(InMemoryGeoRecordStore::new()),
                progress: Arc::new(InMemoryProgressBackend::new()),
                jobs,
            },
        )
    }

    fn assemble(config: &GeoConfig, provider: Arc<dyn GeoProvider>, backends: Backends) -> Self {
        let progress = ProgressStore::new(backends.progress, config.batch.progress_ttl);
        let resolver = LookupResolver::new(
            backends.cache,
            backends.records,
            provider,
            config.cache_ttl,
        );
        let orchestrator = Arc::new(BatchOrchestrator::new(
            resolver.clone(),
            progress.clone(),
            config.batch.concurrency,
        ));

        Self {
            resolver,
            scheduler: BatchJobScheduler::new(backends.jobs.clone(), progress),
            jobs: backends.jobs,
            orchestrator,
            config: config.clone(),
        }
    }

    /// Start polling for batch jobs on the current runtime.
    pub fn start_executor(&self) -> JobExecutorHandle {
        let settings = self.config.executor;
        let mut executor =
            JobExecutor::new(self.jobs.clone()).retain_completed(settings.retain_completed);
        executor.register_handler(
            BATCH_JOB_TYPE,
            Arc::new(BatchExecutor::new(self.orchestrator.clone())),
        );

        executor.spawn(
            JobExecutorConfig::default()
                .with_name("geoip-batch-executor")
                .with_poll_interval(settings.poll_interval)
                .with_max_concurrent(settings.max_concurrent),
        )
    }
}

/// Build services for `config`, choosing in-memory or persistent stores.
pub async fn build_services(config: &GeoConfig) -> Result<AppServices, StartupError> {
    let provider: Arc<dyn GeoProvider> = Arc::new(IpBaseClient::new(&config.provider)?);
    if config.provider.api_key.is_none() {
        tracing::warn!("IPBASE_API_KEY not set; provider lookups will fail");
    }

    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(config, provider).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    Ok(AppServices::in_memory(config, provider))
}

#[cfg(feature = "redis")]
async fn build_persistent_services(
    config: &GeoConfig,
    provider: Arc<dyn GeoProvider>,
) -> Result<AppServices, StartupError> {
    use geoip_infra::jobs::PostgresJobStore;
    use geoip_infra::lookup::{PostgresGeoRecordStore, RedisGeoCache};
    use geoip_infra::progress::RedisProgressBackend;

    let database_url = config.database_url.as_deref().ok_or(StartupError::Backend {
        component: "postgres",
        message: "DATABASE_URL is not set".to_string(),
    })?;
    let redis_url = config.redis_url.as_deref().ok_or(StartupError::Backend {
        component: "redis",
        message: "REDIS_URL is not set".to_string(),
    })?;

    let pool = sqlx::PgPool::connect(database_url).await?;

    let records = PostgresGeoRecordStore::new(pool.clone());
    records.ensure_schema().await.map_err(|e| StartupError::Backend {
        component: "record store",
        message: e.to_string(),
    })?;
    let jobs = PostgresJobStore::new(pool);
    jobs.ensure_schema().await.map_err(|e| StartupError::Backend {
        component: "job store",
        message: e.to_string(),
    })?;

    let cache = RedisGeoCache::connect(redis_url)
        .await
        .map_err(|e| StartupError::Backend {
            component: "geo cache",
            message: e.to_string(),
        })?;
    let progress = RedisProgressBackend::connect(redis_url)
        .await
        .map_err(|e| StartupError::Backend {
            component: "progress backend",
            message: e.to_string(),
        })?;

    tracing::info!("using Postgres and Redis backed stores");
    Ok(AppServices::assemble(
        config,
        provider,
        Backends {
            cache: Arc::new(cache),
            records: Arc::new(records),
            progress: Arc::new(progress),
            jobs: Arc::new(jobs),
        },
    ))
}
