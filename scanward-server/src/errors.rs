use std::fmt;

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use scanward_core::{IntakeError, ScanError};
use serde_json::json;
use tracing::error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        (self.status, body).into_response()
    }
}

impl From<ScanError> for AppError {
    fn from(err: ScanError) -> Self {
        let message = err.to_string();
        match err {
            ScanError::Intake(IntakeError::UnknownTarget(_)) => Self::not_found(message),
            ScanError::Intake(_) => Self::bad_request(message),
            ScanError::NotFound(_) => Self::not_found(message),
            ScanError::InvalidTransition { .. } | ScanError::NotTerminal { .. } => {
                Self::conflict(message)
            }
            ScanError::Dispatch { .. } => Self::service_unavailable(message),
            other => {
                error!(error = %other, "request failed");
                Self::internal("internal server error")
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use scanward_model::{ScanJobId, ScanStatus};

    use super::*;

    #[test]
    fn maps_scan_errors_to_status_codes() {
        let cases = [
            (
                ScanError::Intake(IntakeError::NoChecksSelected),
                StatusCode::BAD_REQUEST,
            ),
            (
                ScanError::Intake(IntakeError::UnknownTarget("t".into())),
                StatusCode::NOT_FOUND,
            ),
            (ScanError::not_found(ScanJobId::new()), StatusCode::NOT_FOUND),
            (
                ScanError::InvalidTransition {
                    job_id: ScanJobId::new(),
                    from: ScanStatus::Completed,
                    to: ScanStatus::Cancelled,
                },
                StatusCode::CONFLICT,
            ),
            (
                ScanError::NotTerminal {
                    job_id: ScanJobId::new(),
                    status: ScanStatus::Running,
                },
                StatusCode::CONFLICT,
            ),
            (
                ScanError::Dispatch {
                    job_id: ScanJobId::new(),
                    reason: "queue down".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ScanError::Internal("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }

    #[test]
    fn internal_details_are_not_leaked() {
        let err = AppError::from(ScanError::QueueUnavailable("pg: connection refused".into()));
        assert_eq!(err.message, "internal server error");
    }
}
