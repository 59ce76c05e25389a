use super::dto::WorkerStatusResponse;
use crate::common::response::{ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};

/// Progress of this host's finalizer.
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let body = WorkerStatusResponse::new(state.status.snapshot(), state.config.poll_interval.as_secs());
    ApiSuccess(
        ApiResponse::success(body, "Worker status retrieved successfully"),
        StatusCode::OK,
    )
}
