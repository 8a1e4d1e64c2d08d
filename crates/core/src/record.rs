//! Geolocation lookup result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::RecordId;

/// Placeholder for text fields the provider did not return.
pub const UNKNOWN: &str = "Unknown";

/// The outcome of resolving one address.
///
/// Created once per provider hit, then cached and persisted. When the same
/// record is served from a warmer layer only `is_from_cache` changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRecord {
    pub id: RecordId,
    pub ip_address: String,
    pub country_code: String,
    pub country_name: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    #[serde(default)]
    pub is_from_cache: bool,
    pub created_at: DateTime<Utc>,
}

impl GeoRecord {
    /// A fresh record for `ip_address` with every location field unknown.
    pub fn unknown(ip_address: impl Into<String>) -> Self {
        Self {
            id: RecordId::new(),
            ip_address: ip_address.into(),
            country_code: UNKNOWN.to_string(),
            country_name: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            city: UNKNOWN.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            timezone: UNKNOWN.to_string(),
            is_from_cache: false,
            created_at: Utc::now(),
        }
    }

    pub fn mark_as_cached(mut self) -> Self {
        self.is_from_cache = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_record_defaults() {
        let r = GeoRecord::unknown("8.8.8.8");
        assert_eq!(r.ip_address, "8.8.8.8");
        assert_eq!(r.country_name, UNKNOWN);
        assert_eq!(r.latitude, 0.0);
        assert!(!r.is_from_cache);
    }

    #[test]
    fn marking_as_cached_keeps_identity() {
        let r = GeoRecord::unknown("8.8.8.8");
        let cached = r.clone().mark_as_cached();
        assert!(cached.is_from_cache);
        assert_eq!(cached.id, r.id);
        assert_eq!(cached.created_at, r.created_at);
    }
}
