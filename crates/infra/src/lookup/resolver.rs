//! Cache-aside resolution of a single address.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use geoip_core::{parse_address, GeoRecord, GeoResult};

use super::cache::{cache_key, GeoCache};
use super::provider::GeoProvider;
use super::records::GeoRecordStore;

/// cache → durable store → provider, writing back through the colder layers.
#[derive(Clone)]
pub struct LookupResolver {
    cache: Arc<dyn GeoCache>,
    records: Arc<dyn GeoRecordStore>,
    provider: Arc<dyn GeoProvider>,
    cache_ttl: Duration,
}

impl std::fmt::Debug for LookupResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupResolver")
            .field("cache_ttl", &self.cache_ttl)
            .finish_non_exhaustive()
    }
}

impl LookupResolver {
    pub fn new(
        cache: Arc<dyn GeoCache>,
        records: Arc<dyn GeoRecordStore>,
        provider: Arc<dyn GeoProvider>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            records,
            provider,
            cache_ttl,
        }
    }

    /// Resolve `address`, failing with `InvalidAddress`, `ServiceUnavailable`
    /// or `RateLimited`. Cache and store failures only degrade the lookup.
    #[instrument(skip(self), err)]
    pub async fn resolve(&self, address: &str) -> GeoResult<GeoRecord> {
        let ip = parse_address(address)?;
        let canonical = ip.to_string();
        let key = cache_key(&canonical);

        match self.cache.get(&key).await {
            Ok(Some(record)) => {
                debug!(ip = %canonical, "cache hit");
                return Ok(record.mark_as_cached());
            }
            Ok(None) => {}
            Err(error) => warn!(ip = %canonical, %error, "cache read failed"),
        }

        match self.records.find_latest_by_ip(&canonical).await {
            Ok(Some(record)) => {
                debug!(ip = %canonical, "record store hit");
                self.backfill(&key, &record).await;
                return Ok(record.mark_as_cached());
            }
            Ok(None) => {}
            Err(error) => warn!(ip = %canonical, %error, "record store read failed"),
        }

        let record = self.provider.lookup(ip).await?;
        if let Err(error) = self.records.insert(&record).await {
            warn!(ip = %canonical, %error, "failed to persist lookup");
        }
        self.backfill(&key, &record).await;
        Ok(record)
    }

    /// Most recent lookups, newest first.
    pub async fn history(&self, limit: usize) -> GeoResult<Vec<GeoRecord>> {
        Ok(self.records.recent(limit).await?)
    }

    async fn backfill(&self, key: &str, record: &GeoRecord) {
        if let Err(error) = self.cache.set(key, record, self.cache_ttl).await {
            warn!(key, %error, "cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use geoip_core::GeoError;

    use crate::lookup::cache::{CacheError, InMemoryGeoCache};
    use crate::lookup::provider::ProviderError;
    use crate::lookup::records::InMemoryGeoRecordStore;

    #[derive(Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        fail_with: Option<ProviderError>,
    }

    #[async_trait]
    impl GeoProvider for CountingProvider {
        async fn lookup(&self, ip: IpAddr) -> Result<GeoRecord, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(err) => Err(err.clone()),
                None => {
                    let mut record = GeoRecord::unknown(ip.to_string());
                    record.country_code = "US".to_string();
                    Ok(record)
                }
            }
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl GeoCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<GeoRecord>, CacheError> {
            Err(CacheError::Backend("down".into()))
        }
        async fn set(&self, _: &str, _: &GeoRecord, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".into()))
        }
    }

    struct Fixture {
        resolver: LookupResolver,
        cache: Arc<InMemoryGeoCache>,
        records: Arc<InMemoryGeoRecordStore>,
        provider: Arc<CountingProvider>,
    }

    fn fixture(provider: CountingProvider) -> Fixture {
        let cache = Arc::new(InMemoryGeoCache::new());
        let records = Arc::new(InMemoryGeoRecordStore::new());
        let provider = Arc::new(provider);
        let resolver = LookupResolver::new(
            cache.clone(),
            records.clone(),
            provider.clone(),
            Duration::from_secs(3600),
        );
        Fixture {
            resolver,
            cache,
            records,
            provider,
        }
    }

    #[tokio::test]
    async fn provider_miss_then_cache_hit() {
        let f = fixture(CountingProvider::default());

        let first = f.resolver.resolve("8.8.8.8").await.unwrap();
        assert!(!first.is_from_cache);
        assert_eq!(first.country_code, "US");

        let second = f.resolver.resolve(" 8.8.8.8 ").await.unwrap();
        assert!(second.is_from_cache);
        assert_eq!(second.id, first.id);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.records.recent(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_hit_backfills_cache() {
        let f = fixture(CountingProvider::default());
        let stored = GeoRecord::unknown("1.1.1.1");
        f.records.insert(&stored).await.unwrap();

        let got = f.resolver.resolve("1.1.1.1").await.unwrap();
        assert!(got.is_from_cache);
        assert_eq!(got.id, stored.id);
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
        assert_eq!(f.cache.len(), 1);
    }

    #[tokio::test]
    async fn invalid_address_never_reaches_provider() {
        let f = fixture(CountingProvider::default());
        let err = f.resolver.resolve("not-an-ip").await.unwrap_err();
        assert!(matches!(err, GeoError::InvalidAddress(_)));
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_errors_surface_as_domain_errors() {
        let f = fixture(CountingProvider {
            fail_with: Some(ProviderError::RateLimited),
            ..Default::default()
        });
        assert_eq!(
            f.resolver.resolve("8.8.4.4").await.unwrap_err(),
            GeoError::RateLimited
        );
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn broken_cache_degrades_to_provider() {
        let records = Arc::new(InMemoryGeoRecordStore::new());
        let provider = Arc::new(CountingProvider::default());
        let resolver = LookupResolver::new(
            Arc::new(BrokenCache),
            records.clone(),
            provider.clone(),
            Duration::from_secs(60),
        );

        let got = resolver.resolve("9.9.9.9").await.unwrap();
        assert!(!got.is_from_cache);
        assert_eq!(records.recent(1).await.unwrap()[0].ip_address, "9.9.9.9");
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let f = fixture(CountingProvider::default());
        f.resolver.resolve("10.0.0.1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        f.resolver.resolve("10.0.0.2").await.unwrap();

        let history = f.resolver.history(50).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].ip_address, "10.0.0.2");
    }
}
