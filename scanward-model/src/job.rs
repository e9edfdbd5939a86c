use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ids::{OrganizationId, ScanJobId, TargetId, UserId},
    status::{CheckType, ScanStatus},
};

/// What a job scans: a saved target or a raw URL, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScanTarget {
    Saved { target_id: TargetId },
    Url { url: String },
}

impl ScanTarget {
    pub fn target_id(&self) -> Option<TargetId> {
        match self {
            ScanTarget::Saved { target_id } => Some(*target_id),
            ScanTarget::Url { .. } => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ScanTarget::Saved { .. } => None,
            ScanTarget::Url { url } => Some(url),
        }
    }
}

/// Scan address computed once at intake and copied into every task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    /// Normalised URL including scheme (`https://example.com/`).
    pub url: String,
    /// Bare host name or address (`example.com`).
    pub host: String,
}

/// Per-job scan configuration supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Overrides every check's default deadline when present.
    pub timeout_secs: Option<u64>,
    /// Wordlist path handed to checks that enumerate paths.
    pub custom_wordlist: Option<String>,
    /// Free-form options keyed by check name.
    pub options: BTreeMap<String, Value>,
}

impl ScanConfig {
    /// Extract the part of the configuration a single check needs.
    pub fn slice_for(&self, check: &CheckType) -> CheckConfig {
        CheckConfig {
            timeout_secs: self.timeout_secs,
            wordlist: self.custom_wordlist.clone(),
            options: self
                .options
                .get(check.as_str())
                .cloned()
                .unwrap_or(Value::Null),
        }
    }
}

/// Configuration slice carried by a dispatched check task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    pub timeout_secs: Option<u64>,
    pub wordlist: Option<String>,
    pub options: Value,
}

impl CheckConfig {
    /// Read a string option (`{"port_range": "1-1024"}`).
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }
}

/// Durable scan job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: ScanJobId,
    pub target: ScanTarget,
    pub resolved: ResolvedTarget,
    pub organization_id: OrganizationId,
    pub initiated_by: UserId,
    pub status: ScanStatus,
    /// Completion percentage in `[0, 100]`.
    pub progress: u8,
    /// Requested checks; non-empty, de-duplicated, request order.
    pub checks: Vec<CheckType>,
    pub config: ScanConfig,
    /// Optimistic concurrency token, bumped on every status/progress write.
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl ScanJob {
    /// Build a freshly submitted job in `queued` with zero progress.
    pub fn queued(
        target: ScanTarget,
        resolved: ResolvedTarget,
        organization_id: OrganizationId,
        initiated_by: UserId,
        checks: Vec<CheckType>,
        config: ScanConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ScanJobId::new(),
            target,
            resolved,
            organization_id,
            initiated_by,
            status: ScanStatus::Queued,
            progress: 0,
            checks,
            config,
            version: 0,
            failure_reason: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Number of checks the dispatcher fans out for this job.
    pub fn dispatched_checks(&self) -> usize {
        self.checks.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `floor(100 * terminal / dispatched)`, clamped to 100.
    pub fn progress_for(&self, terminal_results: usize) -> u8 {
        let total = self.dispatched_checks();
        if total == 0 {
            return 0;
        }
        let pct = (terminal_results.min(total) * 100) / total;
        pct as u8
    }
}

/// Read-only snapshot returned to polling clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: ScanStatus,
    pub progress: u8,
}

impl From<&ScanJob> for StatusSnapshot {
    fn from(job: &ScanJob) -> Self {
        Self {
            status: job.status,
            progress: job.progress,
        }
    }
}
