pub mod events;
pub mod health;
pub mod scans;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/scans", post(scans::submit).get(scans::list))
        .route("/scans/{id}", get(scans::get))
        .route("/scans/{id}/status", get(scans::status))
        .route("/scans/{id}/results", get(scans::results))
        .route("/scans/{id}/cancel", post(scans::cancel))
        .route("/scans/{id}/report", get(scans::report))
        .route("/scans/{id}/events", get(events::scan_events))
        .route("/checks", get(scans::checks));

    Router::new()
        .nest("/api/v1", api)
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
