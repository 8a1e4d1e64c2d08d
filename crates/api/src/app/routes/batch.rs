use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;

use geoip_core::BatchId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

/// Upper bound on addresses per submission.
pub const MAX_BATCH_SIZE: usize = 1000;

pub fn router() -> Router {
    Router::new()
        .route("/batch", get(list_batches).post(submit_batch))
        .route("/batch/:id", get(get_progress).delete(cancel_batch))
}

pub async fn submit_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::BatchLookupRequest>,
) -> axum::response::Response {
    let addresses = body.ip_addresses.unwrap_or_default();
    if addresses.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "At least one IP address is required.",
        );
    }
    if addresses.len() > MAX_BATCH_SIZE {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("Maximum {MAX_BATCH_SIZE} IP addresses allowed per batch."),
        );
    }

    match services.scheduler.submit(&addresses).await {
        Ok(batch_id) => (
            StatusCode::ACCEPTED,
            Json(dto::BatchSubmittedResponse::new(batch_id)),
        )
            .into_response(),
        Err(e) => errors::geo_error_to_response(e),
    }
}

pub async fn list_batches(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.scheduler.list_scheduled().await {
        Ok(ids) => Json(dto::BatchListResponse {
            batch_ids: ids.iter().map(ToString::to_string).collect(),
        })
        .into_response(),
        Err(e) => errors::geo_error_to_response(e),
    }
}

pub async fn get_progress(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let not_found = || {
        errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Batch ID {id} not found or expired."),
        )
    };

    let Ok(batch_id) = BatchId::from_str(&id) else {
        return not_found();
    };

    match services.scheduler.progress(batch_id).await {
        Ok(Some(progress)) => {
            Json(dto::BatchProgressResponse::from_progress(&progress, Utc::now())).into_response()
        }
        Ok(None) => not_found(),
        Err(e) => errors::geo_error_to_response(e),
    }
}

pub async fn cancel_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let cancelled = match BatchId::from_str(&id) {
        Ok(batch_id) => services.scheduler.cancel(batch_id).await,
        Err(_) => false,
    };
    Json(dto::BatchCancelResponse {
        batch_id: id,
        cancelled,
    })
    .into_response()
}
