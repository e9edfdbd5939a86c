//! Request and response shapes shared by the service facade and HTTP layer.

use serde::{Deserialize, Serialize};

use crate::{
    ids::{OrganizationId, TargetId, UserId},
    job::{ScanConfig, ScanJob},
    result::ScanResult,
};

/// Authenticated caller as established by the upstream auth layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
}

/// Body of a scan submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitScanRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<TargetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub checks: Vec<String>,
    #[serde(default)]
    pub config: ScanConfig,
}

/// Paging for organization job listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListScansQuery {
    pub limit: u32,
    pub offset: u32,
}

impl ListScansQuery {
    pub const MAX_LIMIT: u32 = 200;

    pub fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, Self::MAX_LIMIT),
            offset: self.offset,
        }
    }
}

impl Default for ListScansQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Terminal job plus its results in arrival order, consumed by report generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub job: ScanJob,
    pub results: Vec<ScanResult>,
    pub total_findings: u64,
}

impl ScanReport {
    pub fn new(job: ScanJob, results: Vec<ScanResult>) -> Self {
        let total_findings = results.iter().map(|r| u64::from(r.findings)).sum();
        Self {
            job,
            results,
            total_findings,
        }
    }
}
