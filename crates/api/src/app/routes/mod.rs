use axum::Router;

pub mod batch;
pub mod geoip;
pub mod system;

/// Router for every `/api/geoip` endpoint.
pub fn router() -> Router {
    Router::new().nest("/api/geoip", geoip::router().merge(batch::router()))
}
