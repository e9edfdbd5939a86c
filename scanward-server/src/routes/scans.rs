use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use scanward_model::{
    ListScansQuery, ScanJob, ScanJobId, ScanReport, ScanResult, StatusSnapshot,
    SubmitScanRequest,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::{errors::AppResult, extract::Caller, state::AppState};

pub(crate) fn job_id(path: Result<Path<Uuid>, PathRejection>) -> AppResult<ScanJobId> {
    let Path(id) = path?;
    Ok(ScanJobId::from(id))
}

pub async fn submit(
    State(state): State<AppState>,
    Caller(principal): Caller,
    body: Result<Json<SubmitScanRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ScanJob>)> {
    let Json(request) = body?;
    let job = state.scans().submit(principal, request).await?;
    info!(target: "scan::http", job_id = %job.id, checks = job.checks.len(), "scan accepted");
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn list(
    State(state): State<AppState>,
    Caller(principal): Caller,
    query: Result<Query<ListScansQuery>, QueryRejection>,
) -> AppResult<Json<Vec<ScanJob>>> {
    let Query(query) = query?;
    Ok(Json(state.scans().list(principal, query).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Caller(principal): Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ScanJob>> {
    let id = job_id(path)?;
    Ok(Json(state.scans().get(principal, id).await?))
}

pub async fn status(
    State(state): State<AppState>,
    Caller(principal): Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<StatusSnapshot>> {
    let id = job_id(path)?;
    Ok(Json(state.scans().status(principal, id).await?))
}

pub async fn results(
    State(state): State<AppState>,
    Caller(principal): Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<Vec<ScanResult>>> {
    let id = job_id(path)?;
    Ok(Json(state.scans().results(principal, id).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Caller(principal): Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ScanJob>> {
    let id = job_id(path)?;
    let job = state.scans().cancel(principal, id).await?;
    info!(target: "scan::http", job_id = %job.id, "scan cancelled");
    Ok(Json(job))
}

pub async fn report(
    State(state): State<AppState>,
    Caller(principal): Caller,
    path: Result<Path<Uuid>, PathRejection>,
) -> AppResult<Json<ScanReport>> {
    let id = job_id(path)?;
    Ok(Json(state.scans().report(principal, id).await?))
}

#[derive(Debug, Serialize)]
pub struct ChecksResponse {
    pub checks: Vec<String>,
}

pub async fn checks(State(state): State<AppState>) -> Json<ChecksResponse> {
    let mut checks: Vec<String> = state
        .scans()
        .registry()
        .names()
        .map(|name| name.to_string())
        .collect();
    checks.sort();
    Json(ChecksResponse { checks })
}
