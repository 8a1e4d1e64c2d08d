//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type GeoResult<T> = Result<T, GeoError>;

/// Failure taxonomy shared by the lookup and batch pipelines.
///
/// Infrastructure crates convert their local errors into one of these at
/// component boundaries; the HTTP layer maps them to status codes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GeoError {
    /// A request carried no usable input (e.g. a batch with no valid address).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A single address is not a syntactically valid IP literal, or the
    /// provider rejected it.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// The lookup provider could not serve the request (network, 5xx,
    /// misconfiguration, malformed body).
    #[error("lookup service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The lookup provider throttled the request.
    #[error("lookup provider rate limit exceeded")]
    RateLimited,

    /// A fired job carried no payload or one that failed to deserialize.
    #[error("malformed job payload: {0}")]
    MalformedJobPayload(String),

    /// The job substrate rejected a registration.
    #[error("scheduler failure: {0}")]
    SchedulerFailure(String),

    #[error("not found")]
    NotFound,

    /// A backing store (progress, records) failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl GeoError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Self::InvalidAddress(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn malformed_payload(msg: impl Into<String>) -> Self {
        Self::MalformedJobPayload(msg.into())
    }

    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::SchedulerFailure(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}
