//! Process configuration, read once from the environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

/// IPBase client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.ipbase.com".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            user_agent: "GeoIPIdentifier/1.0".to_string(),
        }
    }
}

/// Fan-out width and progress retention for batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub concurrency: usize,
    pub progress_ttl: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            concurrency: 5,
            progress_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    pub poll_interval: Duration,
    pub max_concurrent: usize,
    /// Keep successful jobs as `Completed` instead of deleting them.
    pub retain_completed: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_concurrent: 10,
            retain_completed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoConfig {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub provider: ProviderSettings,
    pub cache_ttl: Duration,
    pub batch: BatchPolicy,
    pub executor: ExecutorSettings,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            redis_url: None,
            provider: ProviderSettings::default(),
            cache_ttl: Duration::from_secs(3600),
            batch: BatchPolicy::default(),
            executor: ExecutorSettings::default(),
        }
    }
}

impl GeoConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            bind_addr: parse_or(&get, "BIND_ADDR", defaults.bind_addr)?,
            use_persistent_stores: parse_bool(&get, "USE_PERSISTENT_STORES", false)?,
            database_url: get("DATABASE_URL"),
            redis_url: get("REDIS_URL"),
            provider: ProviderSettings {
                base_url: get("IPBASE_BASE_URL").unwrap_or(defaults.provider.base_url),
                api_key: get("IPBASE_API_KEY"),
                timeout: Duration::from_secs(parse_or(&get, "IPBASE_TIMEOUT_SECS", 30u64)?),
                user_agent: defaults.provider.user_agent,
            },
            cache_ttl: Duration::from_secs(parse_or(&get, "CACHE_TTL_SECS", 3600u64)?),
            batch: BatchPolicy {
                concurrency: parse_or(&get, "BATCH_CONCURRENCY", defaults.batch.concurrency)?,
                progress_ttl: Duration::from_secs(parse_or(
                    &get,
                    "BATCH_PROGRESS_TTL_SECS",
                    defaults.batch.progress_ttl.as_secs(),
                )?),
            },
            executor: ExecutorSettings {
                poll_interval: Duration::from_millis(parse_or(&get, "JOB_POLL_INTERVAL_MS", 250u64)?),
                max_concurrent: parse_or(&get, "JOB_MAX_CONCURRENT", defaults.executor.max_concurrent)?,
                retain_completed: parse_bool(&get, "JOB_RETAIN_COMPLETED", false)?,
            },
        };

        require_positive("BATCH_CONCURRENCY", config.batch.concurrency)?;
        require_positive("JOB_MAX_CONCURRENT", config.executor.max_concurrent)?;
        require_nonzero("IPBASE_TIMEOUT_SECS", config.provider.timeout)?;
        require_nonzero("CACHE_TTL_SECS", config.cache_ttl)?;
        require_nonzero("BATCH_PROGRESS_TTL_SECS", config.batch.progress_ttl)?;
        require_nonzero("JOB_POLL_INTERVAL_MS", config.executor.poll_interval)?;

        if config.use_persistent_stores {
            if config.database_url.is_none() {
                return Err(ConfigError::Missing("DATABASE_URL"));
            }
            if config.redis_url.is_none() {
                return Err(ConfigError::Missing("REDIS_URL"));
            }
        }

        Ok(config)
    }
}

fn parse_or<F, T>(get: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_bool<F>(get: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::Invalid {
            key,
            value: v,
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn require_positive(key: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn require_nonzero(key: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
