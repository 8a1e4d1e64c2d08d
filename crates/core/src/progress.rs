//! Batch progress model.
//!
//! A `BatchProgress` is the pollable view of one batch run. Status only moves
//! forward (`Queued` → `Processing` → `Completed`) and `processed` never
//! exceeds `total`.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GeoError;
use crate::id::BatchId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BatchStatus {
    Queued,
    Processing,
    Completed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "Queued",
            BatchStatus::Processing => "Processing",
            BatchStatus::Completed => "Completed",
        }
    }

    /// Forward-only transition check. Re-publishing the current status is allowed.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        next >= *self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed)
    }
}

impl core::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Queued" => Ok(BatchStatus::Queued),
            "Processing" => Ok(BatchStatus::Processing),
            "Completed" => Ok(BatchStatus::Completed),
            other => Err(GeoError::storage(format!("unknown batch status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub total: u64,
    pub processed: u64,
    pub start_time: DateTime<Utc>,
    pub completed_time: Option<DateTime<Utc>>,
}

impl BatchProgress {
    /// A freshly submitted batch.
    pub fn queued(batch_id: BatchId, total: u64, start_time: DateTime<Utc>) -> Self {
        Self {
            batch_id,
            status: BatchStatus::Queued,
            total,
            processed: 0,
            start_time,
            completed_time: None,
        }
    }

    /// `processed / total * 100`, or 0 for an empty batch.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }

    /// Remaining time extrapolated from the average throughput so far.
    ///
    /// Only defined while `Processing` with at least one address done and a
    /// positive elapsed time.
    pub fn estimated_time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.status != BatchStatus::Processing || self.processed == 0 {
            return None;
        }
        let elapsed = (now - self.start_time).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }
        let rate = self.processed as f64 / elapsed;
        let remaining = self.total.saturating_sub(self.processed) as f64;
        Some(Duration::from_secs_f64(remaining / rate))
    }

    /// Check the record's internal invariants.
    pub fn validate(&self) -> Result<(), GeoError> {
        if self.processed > self.total {
            return Err(GeoError::storage(format!(
                "batch {}: processed {} exceeds total {}",
                self.batch_id, self.processed, self.total
            )));
        }
        if self.status.is_terminal()
            && (self.processed != self.total || self.completed_time.is_none())
        {
            return Err(GeoError::storage(format!(
                "batch {}: completed without full count or completion time",
                self.batch_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn status_moves_forward_only() {
        use BatchStatus::*;
        assert!(Queued.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Processing));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Queued));
    }

    #[test]
    fn status_text_round_trips() {
        for s in [BatchStatus::Queued, BatchStatus::Processing, BatchStatus::Completed] {
            assert_eq!(s.as_str().parse::<BatchStatus>().unwrap(), s);
        }
        assert!("Done".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn percentage_of_empty_batch_is_zero() {
        let p = BatchProgress::queued(BatchId::new(), 0, at(0));
        assert_eq!(p.percentage(), 0.0);
    }

    #[test]
    fn eta_extrapolates_throughput() {
        let mut p = BatchProgress::queued(BatchId::new(), 100, at(0));
        p.status = BatchStatus::Processing;
        p.processed = 25;
        // 25 in 10s → 2.5/s → 75 remaining take 30s
        let eta = p.estimated_time_remaining(at(10)).unwrap();
        assert_eq!(eta.as_secs(), 30);
    }

    #[test]
    fn eta_absent_unless_processing_with_progress() {
        let mut p = BatchProgress::queued(BatchId::new(), 10, at(0));
        assert!(p.estimated_time_remaining(at(5)).is_none());

        p.status = BatchStatus::Processing;
        assert!(p.estimated_time_remaining(at(5)).is_none());

        p.processed = 10;
        p.status = BatchStatus::Completed;
        p.completed_time = Some(at(6));
        assert!(p.estimated_time_remaining(at(7)).is_none());
    }

    #[test]
    fn completed_requires_full_count_and_timestamp() {
        let mut p = BatchProgress::queued(BatchId::new(), 3, at(0));
        p.status = BatchStatus::Completed;
        p.processed = 3;
        assert!(p.validate().is_err());
        p.completed_time = Some(at(1));
        assert!(p.validate().is_ok());
        p.processed = 2;
        assert!(p.validate().is_err());
    }

    #[test]
    fn serializes_camel_case() {
        let p = BatchProgress::queued(BatchId::new(), 2, at(0));
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["status"], "Queued");
        assert_eq!(v["processed"], 0);
        assert!(v.get("startTime").is_some());
    }
}
