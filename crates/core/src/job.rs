//! Batch job payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GeoError, GeoResult};
use crate::id::BatchId;

/// The write-once input of a batch run, attached to the scheduled job.
///
/// Wire form: `{"batchId": "...", "ipAddresses": [...], "createdAt": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub batch_id: BatchId,
    pub ip_addresses: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    pub fn new(ip_addresses: Vec<String>) -> Self {
        Self {
            batch_id: BatchId::new(),
            ip_addresses,
            created_at: Utc::now(),
        }
    }

    pub fn total(&self) -> u64 {
        self.ip_addresses.len() as u64
    }

    pub fn to_payload(&self) -> GeoResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| GeoError::scheduler(e.to_string()))
    }

    /// Decode a fired job's payload. `Null` (no payload attached) is malformed.
    pub fn from_payload(payload: &serde_json::Value) -> GeoResult<Self> {
        if payload.is_null() {
            return Err(GeoError::malformed_payload("job has no payload"));
        }
        Self::deserialize(payload).map_err(|e| GeoError::malformed_payload(e.to_string()))
    }
}
