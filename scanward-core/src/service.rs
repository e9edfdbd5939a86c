//! Organization-scoped facade over the orchestration components.

use std::{fmt, sync::Arc};

use scanward_model::{
    ListScansQuery, Principal, ScanJob, ScanJobId, ScanReport, ScanResult, StatusSnapshot,
    SubmitScanRequest,
};

use crate::{
    checks::CheckRegistry,
    error::{Result, ScanError},
    orchestration::{
        DispatchOutcome, Dispatcher, JobIntake, ResultStore, ScanJobRepository, StatusController,
    },
};

/// Entry point used by the HTTP layer.
///
/// Every read resolves the job within the caller's organization first; jobs
/// of other organizations are reported as not found.
#[derive(Clone)]
pub struct ScanService {
    registry: Arc<CheckRegistry>,
    jobs: Arc<dyn ScanJobRepository>,
    intake: JobIntake,
    dispatcher: Dispatcher,
    status: StatusController,
    results: ResultStore,
}

impl fmt::Debug for ScanService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanService")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl ScanService {
    pub fn new(
        registry: Arc<CheckRegistry>,
        jobs: Arc<dyn ScanJobRepository>,
        intake: JobIntake,
        dispatcher: Dispatcher,
        status: StatusController,
        results: ResultStore,
    ) -> Self {
        Self {
            registry,
            jobs,
            intake,
            dispatcher,
            status,
            results,
        }
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Validate, persist and dispatch a scan.
    ///
    /// Returns the job as stored after dispatch. When the queue refuses the
    /// batch the job is already `failed` and the error carries its id.
    pub async fn submit(&self, principal: Principal, request: SubmitScanRequest) -> Result<ScanJob> {
        let job = self.intake.submit(principal, request).await?;
        match self.dispatcher.dispatch(&job).await? {
            DispatchOutcome::Failed { reason } => Err(ScanError::Dispatch {
                job_id: job.id,
                reason,
            }),
            DispatchOutcome::Dispatched { .. } | DispatchOutcome::Skipped { .. } => {
                Ok(self.jobs.get(job.id).await?.unwrap_or(job))
            }
        }
    }

    pub async fn get(&self, principal: Principal, job_id: ScanJobId) -> Result<ScanJob> {
        self.jobs
            .get(job_id)
            .await?
            .filter(|job| job.organization_id == principal.organization_id)
            .ok_or_else(|| ScanError::not_found(job_id))
    }

    pub async fn list(&self, principal: Principal, query: ListScansQuery) -> Result<Vec<ScanJob>> {
        let query = query.clamped();
        self.jobs
            .list_by_organization(principal.organization_id, query.limit, query.offset)
            .await
    }

    pub async fn status(&self, principal: Principal, job_id: ScanJobId) -> Result<StatusSnapshot> {
        let job = self.get(principal, job_id).await?;
        Ok(StatusSnapshot::from(&job))
    }

    /// Results in arrival order.
    pub async fn results(&self, principal: Principal, job_id: ScanJobId) -> Result<Vec<ScanResult>> {
        self.get(principal, job_id).await?;
        self.results.list(job_id).await
    }

    /// Cancel a queued or running job. In-flight checks finish on their own.
    pub async fn cancel(&self, principal: Principal, job_id: ScanJobId) -> Result<ScanJob> {
        self.get(principal, job_id).await?;
        self.status.cancel(job_id).await
    }

    /// Terminal job plus its ordered results, for the report generator.
    pub async fn report(&self, principal: Principal, job_id: ScanJobId) -> Result<ScanReport> {
        let job = self.get(principal, job_id).await?;
        if !job.is_terminal() {
            return Err(ScanError::NotTerminal {
                job_id,
                status: job.status,
            });
        }
        let results = self.results.list(job_id).await?;
        Ok(ScanReport::new(job, results))
    }
}
