//! Core data model definitions shared across Scanward crates.
#![allow(missing_docs)]

pub mod api;
pub mod error;
pub mod ids;
pub mod job;
pub mod result;
pub mod status;

pub use api::{ListScansQuery, Principal, ScanReport, SubmitScanRequest};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{OrganizationId, ResultId, ScanJobId, TargetId, TaskId, UserId};
pub use job::{
    CheckConfig, ResolvedTarget, ScanConfig, ScanJob, ScanTarget, StatusSnapshot,
};
pub use result::{
    CheckPayload, CommandOutput, ExecutionFailure, HeaderAudit, ResultDraft,
    ScanResult,
};
pub use status::{CheckType, ResultStatus, ScanStatus, Severity};
