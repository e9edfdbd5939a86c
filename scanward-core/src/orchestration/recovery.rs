use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};

use crate::error::Result;

use super::{
    config::RecoveryConfig,
    dispatcher::{DispatchOutcome, Dispatcher},
    queue::TaskQueue,
    store::ScanJobRepository,
};

/// Tally of one sweep over stale queued jobs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub dispatched: usize,
    pub failed: usize,
    /// Jobs that still had tasks waiting in the queue.
    pub pending: usize,
    pub errors: usize,
}

/// Finds jobs stuck in `queued` without tasks and dispatches them again.
///
/// Covers a process dying between job insert and enqueue, and a refused
/// batch whose `failed` transition could not be written. A second refusal
/// fails the job the usual way.
#[derive(Clone)]
pub struct QueuedJobSweeper {
    jobs: Arc<dyn ScanJobRepository>,
    queue: Arc<dyn TaskQueue>,
    dispatcher: Dispatcher,
    config: RecoveryConfig,
}

impl fmt::Debug for QueuedJobSweeper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedJobSweeper")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueuedJobSweeper {
    pub fn new(
        jobs: Arc<dyn ScanJobRepository>,
        queue: Arc<dyn TaskQueue>,
        dispatcher: Dispatcher,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            jobs,
            queue,
            dispatcher,
            config,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let cutoff = chrono::Duration::from_std(self.config.stale_after())
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale = self
            .jobs
            .list_stale_queued(cutoff, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        for job in stale {
            match self.queue.pending_for_job(job.id).await {
                Ok(0) => {}
                Ok(_) => {
                    report.pending += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(target: "scan::dispatch", job_id = %job.id, "pending task lookup failed: {err}");
                    report.errors += 1;
                    continue;
                }
            }

            tracing::info!(
                target: "scan::dispatch",
                job_id = %job.id,
                queued_since = %job.updated_at,
                "re-dispatching stale queued job"
            );
            match self.dispatcher.dispatch(&job).await {
                Ok(DispatchOutcome::Dispatched { .. }) => report.dispatched += 1,
                Ok(DispatchOutcome::Failed { .. }) => report.failed += 1,
                Ok(DispatchOutcome::Skipped { .. }) => {}
                Err(err) => {
                    tracing::warn!(target: "scan::dispatch", job_id = %job.id, "re-dispatch failed: {err}");
                    report.errors += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::{
        config::{DeadlineConfig, StatusConfig},
        events::NoopEventPublisher,
        memory::{InMemoryResultRepository, InMemoryScanJobRepository, InMemoryTaskQueue},
        status::StatusController,
        task::CheckTask,
    };
    use scanward_model::{
        CheckType, OrganizationId, ResolvedTarget, ScanConfig, ScanJob, ScanStatus, ScanTarget,
        UserId,
    };
    use std::time::Duration;

    struct Fixture {
        jobs: Arc<InMemoryScanJobRepository>,
        queue: Arc<InMemoryTaskQueue>,
        sweeper: QueuedJobSweeper,
    }

    fn fixture() -> Fixture {
        let jobs = Arc::new(InMemoryScanJobRepository::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let status = StatusController::new(
            jobs.clone(),
            Arc::new(InMemoryResultRepository::new()),
            Arc::new(NoopEventPublisher),
            StatusConfig::default(),
        );
        let dispatcher = Dispatcher::new(
            queue.clone(),
            status,
            Arc::new(NoopEventPublisher),
            DeadlineConfig::default(),
        );
        let sweeper = QueuedJobSweeper::new(
            jobs.clone(),
            queue.clone(),
            dispatcher,
            RecoveryConfig {
                stale_after_ms: 1_000,
                batch_size: 10,
            },
        );
        Fixture {
            jobs,
            queue,
            sweeper,
        }
    }

    fn job(age: chrono::Duration) -> ScanJob {
        let mut job = ScanJob::queued(
            ScanTarget::Url {
                url: "example.com".into(),
            },
            ResolvedTarget {
                url: "https://example.com/".into(),
                host: "example.com".into(),
            },
            OrganizationId::new(),
            UserId::new(),
            vec![CheckType::new("ping").unwrap(), CheckType::new("dns").unwrap()],
            ScanConfig::default(),
        );
        job.updated_at = Utc::now() - age;
        job
    }

    #[tokio::test]
    async fn stranded_job_is_dispatched_again() {
        let f = fixture();
        let stranded = job(chrono::Duration::minutes(5));
        f.jobs.insert(&stranded).await.unwrap();

        let report = f.sweeper.sweep().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(f.queue.pending_for_job(stranded.id).await.unwrap(), 2);

        let again = f.sweeper.sweep().await.unwrap();
        assert_eq!(again.pending, 1);
        assert_eq!(again.dispatched, 0);
        assert_eq!(f.queue.pending_for_job(stranded.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn fresh_and_enqueued_jobs_are_left_alone() {
        let f = fixture();
        let fresh = job(chrono::Duration::zero());
        f.jobs.insert(&fresh).await.unwrap();

        let waiting = job(chrono::Duration::minutes(5));
        f.jobs.insert(&waiting).await.unwrap();
        f.queue
            .enqueue_batch(vec![CheckTask::for_job(
                &waiting,
                waiting.checks[0].clone(),
                Duration::from_secs(5),
            )])
            .await
            .unwrap();

        let report = f.sweeper.sweep().await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.pending, 1);
        assert_eq!(report.dispatched, 0);
        assert_eq!(f.queue.pending_for_job(fresh.id).await.unwrap(), 0);
        assert_eq!(
            f.jobs.get(fresh.id).await.unwrap().unwrap().status,
            ScanStatus::Queued
        );
    }
}
