//! Progress aggregation and the job state machine.
//!
//! Every mutation follows the same optimistic cycle: read the job with its
//! version, decide a candidate, conditionally write it keyed on the version,
//! and start over on conflict. Only the writer whose conditional write lands
//! performs (and announces) a transition, so terminal flips happen once.

use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use rand::Rng;
use scanward_model::{ScanJob, ScanJobId, ScanStatus, StatusSnapshot};

use crate::error::{Result, ScanError};

use super::{
    config::StatusConfig,
    events::{ScanEvent, ScanEventPayload, ScanEventPublisher},
    store::{ResultRepository, ScanJobRepository},
};

/// What a decision function wants done with the current job.
#[derive(Debug)]
enum Decision {
    Write(Box<ScanJob>),
    Keep,
    Reject(ScanError),
}

/// Result of a status operation.
#[derive(Clone, Debug)]
pub struct Transition {
    /// Status observed by the attempt that settled the operation.
    pub from: ScanStatus,
    /// Job as stored after the operation.
    pub job: ScanJob,
    /// Whether this call performed the write.
    pub changed: bool,
}

impl Transition {
    /// True when this call moved the job into `status`.
    pub fn entered(&self, status: ScanStatus) -> bool {
        self.changed && self.from != status && self.job.status == status
    }
}

#[derive(Clone)]
pub struct StatusController {
    jobs: Arc<dyn ScanJobRepository>,
    results: Arc<dyn ResultRepository>,
    events: Arc<dyn ScanEventPublisher>,
    config: StatusConfig,
}

impl fmt::Debug for StatusController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusController")
            .field("config", &self.config)
            .finish()
    }
}

impl StatusController {
    pub fn new(
        jobs: Arc<dyn ScanJobRepository>,
        results: Arc<dyn ResultRepository>,
        events: Arc<dyn ScanEventPublisher>,
        config: StatusConfig,
    ) -> Self {
        Self {
            jobs,
            results,
            events,
            config,
        }
    }

    async fn load(&self, job_id: ScanJobId) -> Result<ScanJob> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| ScanError::not_found(job_id))
    }

    /// Read-decide-conditional-write loop.
    async fn update<F>(&self, job_id: ScanJobId, mut decide: F) -> Result<Transition>
    where
        F: FnMut(&ScanJob) -> Decision,
    {
        let attempts = self.config.max_cas_attempts.max(1);
        for attempt in 1..=attempts {
            let current = self.load(job_id).await?;
            let mut next = match decide(&current) {
                Decision::Keep => {
                    return Ok(Transition {
                        from: current.status,
                        job: current,
                        changed: false,
                    });
                }
                Decision::Reject(err) => return Err(err),
                Decision::Write(next) => *next,
            };

            next.version = current.version + 1;
            next.updated_at = Utc::now();
            if self.jobs.compare_and_swap(current.version, &next).await? {
                return Ok(Transition {
                    from: current.status,
                    job: next,
                    changed: true,
                });
            }

            tracing::trace!(
                target: "scan::status",
                job_id = %job_id,
                attempt,
                "conditional write lost, retrying"
            );
            if self.config.cas_backoff_max_ms > 0 {
                let pause = rand::rng().random_range(0..=self.config.cas_backoff_max_ms);
                tokio::time::sleep(Duration::from_millis(pause)).await;
            }
        }

        tracing::warn!(target: "scan::status", job_id = %job_id, attempts, "status update gave up");
        Err(ScanError::Conflict { job_id, attempts })
    }

    async fn emit(&self, job_id: ScanJobId, payload: ScanEventPayload) {
        if let Err(err) = self.events.publish(ScanEvent::new(job_id, payload)).await {
            tracing::warn!(target: "scan::status", job_id = %job_id, "event publish failed: {err}");
        }
    }

    /// `queued → running` on the first task start. No-op in any other state.
    pub async fn mark_running(&self, job_id: ScanJobId) -> Result<Transition> {
        let transition = self
            .update(job_id, |job| {
                if job.status != ScanStatus::Queued {
                    return Decision::Keep;
                }
                let mut next = job.clone();
                next.status = ScanStatus::Running;
                next.started_at.get_or_insert_with(Utc::now);
                Decision::Write(Box::new(next))
            })
            .await?;

        if transition.entered(ScanStatus::Running) {
            tracing::info!(target: "scan::status", job_id = %job_id, "scan running");
            self.emit(job_id, ScanEventPayload::Started).await;
        }
        Ok(transition)
    }

    /// Recompute progress after a result landed and complete the job once
    /// every dispatched check has a terminal result.
    ///
    /// Terminal jobs are left untouched, which is what keeps late results of
    /// a cancelled job from completing it.
    pub async fn on_result(&self, job_id: ScanJobId) -> Result<Transition> {
        let recorded = self.results.count(job_id).await?;

        let transition = self
            .update(job_id, |job| {
                if job.is_terminal() {
                    return Decision::Keep;
                }
                let progress = job.progress.max(job.progress_for(recorded));
                let done = recorded >= job.dispatched_checks();
                let status = if done {
                    ScanStatus::Completed
                } else {
                    ScanStatus::Running
                };
                if progress == job.progress && status == job.status {
                    return Decision::Keep;
                }

                let mut next = job.clone();
                next.progress = progress;
                next.status = status;
                next.started_at.get_or_insert_with(Utc::now);
                if done {
                    next.progress = 100;
                    next.completed_at = Some(Utc::now());
                }
                Decision::Write(Box::new(next))
            })
            .await?;

        if transition.changed {
            if transition.from == ScanStatus::Queued {
                self.emit(job_id, ScanEventPayload::Started).await;
            }
            self.emit(
                job_id,
                ScanEventPayload::Progress {
                    progress: transition.job.progress,
                },
            )
            .await;
        }
        if transition.entered(ScanStatus::Completed) {
            tracing::info!(
                target: "scan::status",
                job_id = %job_id,
                checks = transition.job.dispatched_checks(),
                "scan completed"
            );
            self.emit(job_id, ScanEventPayload::Completed).await;
        }
        Ok(transition)
    }

    /// `queued|running → cancelled`. Anything else is an invalid transition.
    pub async fn cancel(&self, job_id: ScanJobId) -> Result<ScanJob> {
        let transition = self
            .update(job_id, |job| {
                if !job.status.is_cancellable() {
                    return Decision::Reject(ScanError::InvalidTransition {
                        job_id,
                        from: job.status,
                        to: ScanStatus::Cancelled,
                    });
                }
                let mut next = job.clone();
                next.status = ScanStatus::Cancelled;
                next.completed_at = Some(Utc::now());
                Decision::Write(Box::new(next))
            })
            .await?;

        tracing::info!(
            target: "scan::status",
            job_id = %job_id,
            from = %transition.from,
            progress = transition.job.progress,
            "scan cancelled"
        );
        self.emit(job_id, ScanEventPayload::Cancelled).await;
        Ok(transition.job)
    }

    /// `queued → failed` after the dispatcher could not enqueue the batch.
    ///
    /// A job cancelled in the meantime stays cancelled.
    pub async fn mark_dispatch_failed(
        &self,
        job_id: ScanJobId,
        reason: &str,
    ) -> Result<Transition> {
        let transition = self
            .update(job_id, |job| match job.status {
                ScanStatus::Queued => {
                    let mut next = job.clone();
                    next.status = ScanStatus::Failed;
                    next.progress = 0;
                    next.failure_reason = Some(reason.to_string());
                    next.completed_at = Some(Utc::now());
                    Decision::Write(Box::new(next))
                }
                ScanStatus::Cancelled => Decision::Keep,
                other => Decision::Reject(ScanError::InvalidTransition {
                    job_id,
                    from: other,
                    to: ScanStatus::Failed,
                }),
            })
            .await?;

        if transition.entered(ScanStatus::Failed) {
            tracing::warn!(target: "scan::status", job_id = %job_id, reason, "scan failed at dispatch");
            self.emit(
                job_id,
                ScanEventPayload::DispatchFailed {
                    reason: reason.to_string(),
                },
            )
            .await;
        }
        Ok(transition)
    }

    pub async fn is_cancelled(&self, job_id: ScanJobId) -> Result<bool> {
        Ok(self.load(job_id).await?.status == ScanStatus::Cancelled)
    }

    pub async fn snapshot(&self, job_id: ScanJobId) -> Result<StatusSnapshot> {
        Ok(StatusSnapshot::from(&self.load(job_id).await?))
    }
}
