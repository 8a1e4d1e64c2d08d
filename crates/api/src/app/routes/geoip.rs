use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const HISTORY_LIMIT: usize = 50;

pub fn router() -> Router {
    Router::new()
        .route("/history", get(history))
        .route("/:ip", get(lookup))
}

pub async fn lookup(
    Extension(services): Extension<Arc<AppServices>>,
    Path(ip): Path<String>,
) -> axum::response::Response {
    match services.resolver.resolve(&ip).await {
        Ok(record) => Json(dto::GeoIpResponse::from(record)).into_response(),
        Err(e) => errors::geo_error_to_response(e),
    }
}

pub async fn history(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.resolver.history(HISTORY_LIMIT).await {
        Ok(records) => Json(
            records
                .into_iter()
                .map(dto::GeoIpResponse::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => errors::geo_error_to_response(e),
    }
}
