//! Persistence ports for jobs, results and the external target catalogue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanward_model::{
    CheckType, OrganizationId, ResultDraft, ScanJob, ScanJobId, ScanResult, TargetId,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[async_trait]
pub trait ScanJobRepository: Send + Sync {
    async fn insert(&self, job: &ScanJob) -> Result<()>;

    async fn get(&self, id: ScanJobId) -> Result<Option<ScanJob>>;

    /// Persist `next` only if the stored version still equals
    /// `expected_version`. Returns `false` when another writer got there first.
    async fn compare_and_swap(&self, expected_version: i64, next: &ScanJob) -> Result<bool>;

    /// Jobs of one organization, newest first.
    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ScanJob>>;

    /// Jobs still `queued` whose last update is older than `updated_before`,
    /// oldest first.
    async fn list_stale_queued(
        &self,
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScanJob>>;
}

/// Outcome of an idempotent result write.
#[derive(Clone, Debug, PartialEq)]
pub enum UpsertOutcome {
    /// First delivery for this (job, check type).
    Inserted(ScanResult),
    /// A result already existed; the stored one is returned unchanged.
    Duplicate(ScanResult),
}

impl UpsertOutcome {
    pub fn result(&self) -> &ScanResult {
        match self {
            UpsertOutcome::Inserted(result) | UpsertOutcome::Duplicate(result) => result,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Result storage keyed by (job, check type). First write wins.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    async fn upsert(&self, draft: ResultDraft, after_cancel: bool) -> Result<UpsertOutcome>;

    /// Set `after_cancel` on a stored result. Returns `false` when no result
    /// exists for the pair or the flag was already set.
    async fn mark_after_cancel(&self, job_id: ScanJobId, check_type: &CheckType) -> Result<bool>;

    /// Results of a job in arrival order.
    async fn list(&self, job_id: ScanJobId) -> Result<Vec<ScanResult>>;

    /// Number of distinct check types with a stored result.
    async fn count(&self, job_id: ScanJobId) -> Result<usize>;
}

/// Saved target as owned by the external target catalogue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub id: TargetId,
    pub organization_id: OrganizationId,
    /// Host name, address or URL to scan.
    pub address: String,
}

/// Read-only lookup into the external target catalogue.
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    async fn lookup(&self, id: TargetId) -> Result<Option<TargetRecord>>;
}
