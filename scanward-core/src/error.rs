use scanward_model::{ModelError, ScanJobId, ScanStatus};
use thiserror::Error;

/// Rejections raised by job intake before anything is persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntakeError {
    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Either a target id or a url is required")]
    MissingTarget,

    #[error("Provide a target id or a url, not both")]
    AmbiguousTarget,

    #[error("Invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("At least one check must be selected")]
    NoChecksSelected,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("Dispatch failed for job {job_id}: {reason}")]
    Dispatch { job_id: ScanJobId, reason: String },

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: ScanJobId,
        from: ScanStatus,
        to: ScanStatus,
    },

    #[error("Scan job {job_id} is still {status}")]
    NotTerminal {
        job_id: ScanJobId,
        status: ScanStatus,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Concurrent update conflict on job {job_id} after {attempts} attempts")]
    Conflict { job_id: ScanJobId, attempts: u32 },

    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    pub fn not_found(job_id: ScanJobId) -> Self {
        ScanError::NotFound(format!("scan job {job_id}"))
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

/// Failure of a single check function. Always converted into an `error`
/// result by the worker; never fails the job.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("tool {program} failed: {message}")]
    Tool { program: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unsupported target for {check}: {reason}")]
    Unsupported { check: String, reason: String },

    #[error("invalid pattern for {check}: {source}")]
    InvalidPattern {
        check: String,
        #[source]
        source: regex::Error,
    },
}
