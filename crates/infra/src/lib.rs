//! Infrastructure layer: job substrate, progress side channel, lookup chain,
//! batch pipeline and configuration.

pub mod batch;
pub mod config;
pub mod jobs;
pub mod lookup;
pub mod progress;


pub use config::{BatchPolicy, ConfigError, ExecutorSettings, GeoConfig, ProviderSettings};
