use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use geoip_core::{BatchId, BatchProgress, GeoRecord};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchLookupRequest {
    #[serde(default)]
    pub ip_addresses: Option<Vec<String>>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoIpResponse {
    pub id: String,
    pub ip_address: String,
    pub country_code: String,
    pub country_name: String,
    pub region: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: String,
    pub is_from_cache: bool,
    pub created_at: DateTime<Utc>,
}

impl From<GeoRecord> for GeoIpResponse {
    fn from(r: GeoRecord) -> Self {
        Self {
            id: r.id.to_string(),
            ip_address: r.ip_address,
            country_code: r.country_code,
            country_name: r.country_name,
            region: r.region,
            city: r.city,
            latitude: r.latitude,
            longitude: r.longitude,
            timezone: r.timezone,
            is_from_cache: r.is_from_cache,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSubmittedResponse {
    pub batch_id: String,
    pub progress_url: String,
}

impl BatchSubmittedResponse {
    pub fn new(batch_id: BatchId) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            progress_url: format!("/api/geoip/batch/{batch_id}"),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchListResponse {
    pub batch_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCancelResponse {
    pub batch_id: String,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressResponse {
    pub batch_id: String,
    pub status: String,
    pub total: u64,
    pub processed: u64,
    pub progress_percentage: f64,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_seconds_remaining: Option<f64>,
}

impl BatchProgressResponse {
    pub fn from_progress(progress: &BatchProgress, now: DateTime<Utc>) -> Self {
        Self {
            batch_id: progress.batch_id.to_string(),
            status: progress.status.as_str().to_string(),
            total: progress.total,
            processed: progress.processed,
            progress_percentage: progress.percentage(),
            start_time: progress.start_time,
            completed_time: progress.completed_time,
            estimated_seconds_remaining: progress
                .estimated_time_remaining(now)
                .map(|d| d.as_secs_f64()),
        }
    }
}
