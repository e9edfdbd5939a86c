use std::{fmt, sync::Arc};

use scanward_model::{CheckType, ResultDraft, ScanJobId, ScanResult, ScanStatus};

use crate::error::{Result, ScanError};

use super::{
    events::{ScanEvent, ScanEventPayload, ScanEventPublisher},
    store::{ResultRepository, ScanJobRepository, UpsertOutcome},
};

/// What happened to a delivered result.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordOutcome {
    /// Stored as the effective result for its (job, check type).
    Inserted(ScanResult),
    /// A result for this (job, check type) already existed.
    Duplicate,
    /// The job was already completed or failed; nothing was written.
    Dropped { job_status: ScanStatus },
}

impl RecordOutcome {
    /// Whether the progress aggregator should be signalled.
    ///
    /// Duplicates signal too: a redelivered task may stem from a worker that
    /// stored its result but died before the progress update.
    pub fn needs_progress_signal(&self) -> bool {
        matches!(self, RecordOutcome::Inserted(_) | RecordOutcome::Duplicate)
    }
}

/// Idempotent result writes plus arrival-ordered reads.
#[derive(Clone)]
pub struct ResultStore {
    jobs: Arc<dyn ScanJobRepository>,
    results: Arc<dyn ResultRepository>,
    events: Arc<dyn ScanEventPublisher>,
}

impl fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStore").finish_non_exhaustive()
    }
}

impl ResultStore {
    pub fn new(
        jobs: Arc<dyn ScanJobRepository>,
        results: Arc<dyn ResultRepository>,
        events: Arc<dyn ScanEventPublisher>,
    ) -> Self {
        Self {
            jobs,
            results,
            events,
        }
    }

    /// Record one check result.
    ///
    /// Completed and failed jobs accept the call but keep nothing. Results
    /// for cancelled jobs are kept for audit and flagged `after_cancel`.
    pub async fn record(&self, draft: ResultDraft) -> Result<RecordOutcome> {
        let job_id = draft.job_id;
        let check_type = draft.check_type.clone();
        let job = self
            .jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ScanError::not_found(job_id))?;

        if matches!(job.status, ScanStatus::Completed | ScanStatus::Failed) {
            tracing::info!(
                target: "scan::results",
                job_id = %job_id,
                check = %check_type,
                status = %job.status,
                "late delivery dropped"
            );
            self.emit(
                job_id,
                ScanEventPayload::LateDelivery {
                    check_type,
                    job_status: job.status,
                },
            )
            .await;
            return Ok(RecordOutcome::Dropped {
                job_status: job.status,
            });
        }

        let after_cancel = job.status == ScanStatus::Cancelled;
        match self.results.upsert(draft, after_cancel).await? {
            UpsertOutcome::Inserted(mut result) => {
                if !after_cancel {
                    result.after_cancel = self.flag_if_cancelled(job_id, &result.check_type).await?;
                }
                let after_cancel = result.after_cancel;
                tracing::debug!(
                    target: "scan::results",
                    job_id = %job_id,
                    check = %result.check_type,
                    status = %result.status,
                    findings = result.findings,
                    severity = %result.severity,
                    after_cancel,
                    "result recorded"
                );
                self.emit(
                    job_id,
                    ScanEventPayload::ResultRecorded {
                        check_type: result.check_type.clone(),
                        status: result.status,
                        findings: result.findings,
                        severity: result.severity,
                        after_cancel,
                    },
                )
                .await;
                Ok(RecordOutcome::Inserted(result))
            }
            UpsertOutcome::Duplicate(_) => {
                tracing::info!(
                    target: "scan::results",
                    job_id = %job_id,
                    check = %check_type,
                    "duplicate delivery ignored"
                );
                self.emit(job_id, ScanEventPayload::DuplicateDelivery { check_type })
                    .await;
                Ok(RecordOutcome::Duplicate)
            }
        }
    }

    /// A cancel may land between the job read and the insert; re-read and
    /// flag the stored row when it did.
    async fn flag_if_cancelled(&self, job_id: ScanJobId, check_type: &CheckType) -> Result<bool> {
        let cancelled = self
            .jobs
            .get(job_id)
            .await?
            .is_some_and(|job| job.status == ScanStatus::Cancelled);
        if !cancelled {
            return Ok(false);
        }
        self.results.mark_after_cancel(job_id, check_type).await?;
        tracing::debug!(
            target: "scan::results",
            job_id = %job_id,
            check = %check_type,
            "job cancelled while result was being stored"
        );
        Ok(true)
    }

    /// Results of a job in arrival order.
    pub async fn list(&self, job_id: ScanJobId) -> Result<Vec<ScanResult>> {
        self.results.list(job_id).await
    }

    async fn emit(&self, job_id: ScanJobId, payload: ScanEventPayload) {
        if let Err(err) = self.events.publish(ScanEvent::new(job_id, payload)).await {
            tracing::warn!(target: "scan::results", job_id = %job_id, "event publish failed: {err}");
        }
    }
}
