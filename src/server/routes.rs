use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::pool_set::PoolSetError;

use super::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/pools/:name/checkout", post(checkout))
        .route("/pools/:name/return", post(return_item))
        .route("/pools/:name/status", get(status))
        .route("/healthz", get(healthz))
        .with_state(state)
}

impl IntoResponse for PoolSetError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            PoolSetError::UnknownPool(_) => (StatusCode::NOT_FOUND, self.to_string()),
            PoolSetError::Pool(crate::pool::PoolError::Draining) => {
                (StatusCode::SERVICE_UNAVAILABLE, "pool draining".to_string())
            }
            PoolSetError::Pool(crate::pool::PoolError::NotCheckedOut(_)) => (StatusCode::NOT_FOUND, self.to_string()),
            PoolSetError::Pool(crate::pool::PoolError::Cancelled) => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            PoolSetError::ActionResolution(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        (status, Json(json!({ "error": true, "message": message }))).into_response()
    }
}

async fn checkout(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.pool_set.checkout(&name, CancellationToken::new()).await {
        Ok(params) => (StatusCode::OK, Json(params)).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
struct ReturnRequest {
    container_id: String,
}

async fn return_item(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<ReturnRequest>,
) -> Response {
    match state.pool_set.return_item(&name, body.container_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn status(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    // Purely observational; the core invariants live in Pool itself.
    match state.pool_set.status(&name).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    if state.pool_set.all_ready() {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}
