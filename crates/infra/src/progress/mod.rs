//! Pollable batch progress kept in a key-value side channel.
//!
//! ## Components
//!
//! - `ProgressBackend`: hash records with field writes, atomic counters and TTL
//! - `InMemoryProgressBackend`: process-local backend for tests/dev
//! - `RedisProgressBackend`: Redis hashes (feature `redis`)
//! - `ProgressStore`: the batch progress protocol on top of a backend

pub mod backend;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;

pub use backend::{InMemoryProgressBackend, ProgressBackend, ProgressError, ProgressFields};
#[cfg(feature = "redis")]
pub use self::redis::RedisProgressBackend;
pub use store::{ProgressStore, PROGRESS_KEY_PREFIX};
