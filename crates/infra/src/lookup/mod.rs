//! Single-address lookup chain: cache, durable record store, external provider.

pub mod cache;
pub mod postgres;
pub mod provider;
pub mod records;
pub mod resolver;

pub use cache::{cache_key, CacheError, GeoCache, InMemoryGeoCache, CACHE_KEY_PREFIX};
#[cfg(feature = "redis")]
pub use cache::RedisGeoCache;
pub use postgres::PostgresGeoRecordStore;
pub use provider::{GeoProvider, IpBaseClient, ProviderError};
pub use records::{GeoRecordStore, InMemoryGeoRecordStore, RecordStoreError};
pub use resolver::LookupResolver;
