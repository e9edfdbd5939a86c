use axum::{Json, extract::State, http::StatusCode};
use scanward_core::orchestration::QueueDepth;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueDepth>,
}

/// Liveness plus queue occupancy. A queue that cannot report its depth
/// turns the response into a 503.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.queue().depth().await {
        Ok(depth) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                queue: Some(depth),
            }),
        ),
        Err(err) => {
            warn!(error = %err, "queue depth unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    queue: None,
                }),
            )
        }
    }
}
