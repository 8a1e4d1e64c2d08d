use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use geoip_core::GeoError;

pub fn geo_error_to_response(err: GeoError) -> axum::response::Response {
    match err {
        GeoError::InvalidInput(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_input", msg),
        GeoError::InvalidAddress(msg) => {
            json_error(StatusCode::BAD_REQUEST, "invalid_address", format!("Invalid IP address: {msg}"))
        }
        GeoError::RateLimited => json_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Rate limit exceeded. Please try again later.",
        ),
        GeoError::ServiceUnavailable(msg) => {
            tracing::error!(error = %msg, "lookup service unavailable");
            json_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "GeoIP service is temporarily unavailable.",
            )
        }
        GeoError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "not found"),
        other @ (GeoError::MalformedJobPayload(_)
        | GeoError::SchedulerFailure(_)
        | GeoError::Storage(_)) => {
            tracing::error!(error = %other, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", other.to_string())
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
