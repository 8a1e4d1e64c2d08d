//! `geoip-core`: domain types for IP geolocation lookups and batch runs.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! address validation, lookup results, the batch job payload, the progress
//! model and the error taxonomy shared by every other crate.

pub mod address;
pub mod error;
pub mod id;
pub mod job;
pub mod progress;
pub mod record;

pub use address::{filter_valid, is_valid_address, parse_address};
pub use error::{GeoError, GeoResult};
pub use id::{BatchId, RecordId};
pub use job::BatchJob;
pub use progress::{BatchProgress, BatchStatus};
pub use record::GeoRecord;
