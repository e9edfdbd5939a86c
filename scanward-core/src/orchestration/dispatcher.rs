use std::{fmt, sync::Arc};

use scanward_model::{ScanJob, ScanStatus};

use crate::error::Result;

use super::{
    config::DeadlineConfig,
    events::{ScanEvent, ScanEventPayload, ScanEventPublisher},
    queue::TaskQueue,
    status::StatusController,
    task::CheckTask,
};

/// Outcome of fanning a job out into tasks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every task was enqueued.
    Dispatched { tasks: usize },
    /// The job left `queued` before dispatch (e.g. cancelled); nothing enqueued.
    Skipped { status: ScanStatus },
    /// The queue rejected the batch and the job was marked `failed`.
    Failed { reason: String },
}

/// Turns a queued job into one task per selected check.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    status: StatusController,
    events: Arc<dyn ScanEventPublisher>,
    deadlines: DeadlineConfig,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("deadlines", &self.deadlines)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        status: StatusController,
        events: Arc<dyn ScanEventPublisher>,
        deadlines: DeadlineConfig,
    ) -> Self {
        Self {
            queue,
            status,
            events,
            deadlines,
        }
    }

    /// Tasks for `job`, one per check, with resolved deadlines.
    pub fn plan(&self, job: &ScanJob) -> Vec<CheckTask> {
        job.checks
            .iter()
            .map(|check| {
                let deadline = self.deadlines.deadline_for(check, job.config.timeout_secs);
                CheckTask::for_job(job, check.clone(), deadline)
            })
            .collect()
    }

    /// Enqueue all tasks of `job` or none.
    ///
    /// When the queue refuses the batch the job is moved to `failed` with
    /// progress 0, so no job is left partially dispatched.
    pub async fn dispatch(&self, job: &ScanJob) -> Result<DispatchOutcome> {
        let current = self.status.snapshot(job.id).await?;
        if current.status != ScanStatus::Queued {
            tracing::info!(
                target: "scan::dispatch",
                job_id = %job.id,
                status = %current.status,
                "job no longer queued, dispatch skipped"
            );
            return Ok(DispatchOutcome::Skipped {
                status: current.status,
            });
        }

        let tasks = self.plan(job);
        match self.queue.enqueue_batch(tasks).await {
            Ok(count) => {
                tracing::info!(
                    target: "scan::dispatch",
                    job_id = %job.id,
                    tasks = count,
                    "job dispatched"
                );
                let event = ScanEvent::new(job.id, ScanEventPayload::Dispatched { tasks: count });
                if let Err(err) = self.events.publish(event).await {
                    tracing::warn!(target: "scan::dispatch", job_id = %job.id, "event publish failed: {err}");
                }
                Ok(DispatchOutcome::Dispatched { tasks: count })
            }
            Err(err) => {
                let reason = err.to_string();
                tracing::error!(
                    target: "scan::dispatch",
                    job_id = %job.id,
                    error = %reason,
                    "enqueue failed"
                );
                let transition = match self.status.mark_dispatch_failed(job.id, &reason).await {
                    Ok(transition) => transition,
                    Err(err) => {
                        tracing::error!(
                            target: "scan::dispatch",
                            job_id = %job.id,
                            "could not fail job after refused batch, left queued for the stale job sweep: {err}"
                        );
                        return Err(err);
                    }
                };
                if transition.job.status == ScanStatus::Failed {
                    Ok(DispatchOutcome::Failed { reason })
                } else {
                    Ok(DispatchOutcome::Skipped {
                        status: transition.job.status,
                    })
                }
            }
        }
    }
}
