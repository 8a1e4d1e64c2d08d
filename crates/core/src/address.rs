//! IP address syntax validation.
//!
//! Accepts IPv4 dotted-quad and IPv6 literals after trimming surrounding
//! whitespace. No reachability or range checks are made: private and
//! loopback ranges are valid inputs.

use std::net::IpAddr;

use crate::error::{GeoError, GeoResult};

/// Parse a single address, trimming surrounding whitespace.
pub fn parse_address(raw: &str) -> GeoResult<IpAddr> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GeoError::invalid_address("IP address cannot be empty"));
    }
    trimmed
        .parse::<IpAddr>()
        .map_err(|_| GeoError::invalid_address(trimmed.to_string()))
}

pub fn is_valid_address(raw: &str) -> bool {
    parse_address(raw).is_ok()
}

/// Keep the syntactically valid addresses, in input order, normalized to
/// their canonical textual form. Duplicates are preserved.
pub fn filter_valid<S: AsRef<str>>(addresses: &[S]) -> Vec<String> {
    addresses
        .iter()
        .filter_map(|raw| parse_address(raw.as_ref()).ok())
        .map(|ip| ip.to_string())
        .collect()
}
