//! Task execution: run one check under its deadline and turn whatever
//! happens into a result for the store.

use std::{any::Any, fmt, sync::Arc};

use async_trait::async_trait;
use scanward_model::{
    CheckPayload, ExecutionFailure, ResultDraft, ResultStatus, ScanStatus, Severity,
};

use crate::{checks::CheckRegistry, error::ScanError};

use super::{
    config::TimeoutPolicy,
    events::{ScanEvent, ScanEventPayload, ScanEventPublisher},
    lease::TaskLease,
    results::{RecordOutcome, ResultStore},
    status::StatusController,
    task::CheckTask,
};

/// How a check execution ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Execution {
    /// The check returned, failed or panicked within its deadline.
    Finished(ResultDraft),
    /// The deadline elapsed; the draft is the `error` result to record.
    TimedOut(ResultDraft),
}

impl Execution {
    pub fn draft(&self) -> &ResultDraft {
        match self {
            Execution::Finished(draft) | Execution::TimedOut(draft) => draft,
        }
    }

    pub fn into_draft(self) -> ResultDraft {
        match self {
            Execution::Finished(draft) | Execution::TimedOut(draft) => draft,
        }
    }
}

/// Runs registered checks in isolation under a deadline.
#[derive(Clone, Debug)]
pub struct CheckExecutor {
    registry: Arc<CheckRegistry>,
    timeouts: TimeoutPolicy,
}

impl CheckExecutor {
    pub fn new(registry: Arc<CheckRegistry>, timeouts: TimeoutPolicy) -> Self {
        Self { registry, timeouts }
    }

    /// Execute `task`. Never fails: check errors, panics and elapsed
    /// deadlines all become `error` drafts.
    pub async fn execute(&self, task: &CheckTask) -> Execution {
        let Some(check) = self.registry.get(&task.check_type) else {
            return Execution::Finished(error_draft(
                task,
                ExecutionFailure::new(format!("no check registered as {}", task.check_type)),
                0,
                Severity::Info,
            ));
        };

        let deadline = task.deadline();
        let target = task.target.clone();
        let config = task.config.clone();
        let mut handle =
            tokio::spawn(async move { check.run(&target, &config, deadline).await });

        match tokio::time::timeout(deadline, &mut handle).await {
            Ok(Ok(Ok(outcome))) => Execution::Finished(ResultDraft {
                job_id: task.job_id,
                check_type: task.check_type.clone(),
                status: outcome.status,
                payload: CheckPayload::for_check(&task.check_type, outcome.data),
                findings: outcome.findings,
                severity: outcome.severity,
            }),
            Ok(Ok(Err(err))) => {
                tracing::warn!(
                    target: "scan::worker",
                    job_id = %task.job_id,
                    check = %task.check_type,
                    error = %err,
                    "check returned an error"
                );
                Execution::Finished(error_draft(
                    task,
                    ExecutionFailure::new(err.to_string()),
                    0,
                    Severity::Info,
                ))
            }
            Ok(Err(join_err)) => {
                let failure = if join_err.is_panic() {
                    ExecutionFailure::panic(panic_message(join_err.into_panic()))
                } else {
                    ExecutionFailure::new("check task was cancelled")
                };
                tracing::error!(
                    target: "scan::worker",
                    job_id = %task.job_id,
                    check = %task.check_type,
                    reason = %failure.message,
                    "check aborted"
                );
                Execution::Finished(error_draft(task, failure, 0, Severity::Info))
            }
            Err(_) => {
                handle.abort();
                tracing::warn!(
                    target: "scan::worker",
                    job_id = %task.job_id,
                    check = %task.check_type,
                    deadline_secs = task.deadline_secs,
                    attempt = task.attempt,
                    "check timed out"
                );
                Execution::TimedOut(error_draft(
                    task,
                    ExecutionFailure::timeout(task.deadline_secs),
                    self.timeouts.findings,
                    self.timeouts.severity,
                ))
            }
        }
    }
}

fn error_draft(
    task: &CheckTask,
    failure: ExecutionFailure,
    findings: u32,
    severity: Severity,
) -> ResultDraft {
    ResultDraft {
        job_id: task.job_id,
        check_type: task.check_type.clone(),
        status: ResultStatus::Error,
        payload: CheckPayload::failure(failure),
        findings,
        severity,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("check panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("check panicked: {message}")
    } else {
        "check panicked".to_string()
    }
}

/// What the worker loop should do with a lease after handling it.
#[derive(Clone, Debug, PartialEq)]
pub enum TaskStatus {
    /// A result was delivered to the store. Ack.
    Recorded(RecordOutcome),
    /// The job was gone or already terminal; the check never ran. Ack.
    Skipped { job_status: Option<ScanStatus> },
    /// Put `task` back on the queue in place of the leased one.
    Requeue { task: Box<CheckTask> },
    /// Infrastructure failure; redeliver the same task.
    Retry { error: String },
}

impl TaskStatus {
    pub fn should_ack(&self) -> bool {
        matches!(self, TaskStatus::Recorded(_) | TaskStatus::Skipped { .. })
    }
}

/// Contract between the worker loop and task execution.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, lease: &TaskLease) -> TaskStatus;
}

/// Default handler: status gate, execution, result delivery and progress.
#[derive(Clone)]
pub struct ScanTaskHandler {
    status: StatusController,
    results: ResultStore,
    executor: CheckExecutor,
    timeouts: TimeoutPolicy,
    events: Arc<dyn ScanEventPublisher>,
}

impl fmt::Debug for ScanTaskHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanTaskHandler")
            .field("executor", &self.executor)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl ScanTaskHandler {
    pub fn new(
        status: StatusController,
        results: ResultStore,
        executor: CheckExecutor,
        timeouts: TimeoutPolicy,
        events: Arc<dyn ScanEventPublisher>,
    ) -> Self {
        Self {
            status,
            results,
            executor,
            timeouts,
            events,
        }
    }

    async fn emit(&self, task: &CheckTask, payload: ScanEventPayload) {
        if let Err(err) = self.events.publish(ScanEvent::new(task.job_id, payload)).await {
            tracing::warn!(target: "scan::worker", job_id = %task.job_id, "event publish failed: {err}");
        }
    }

    async fn deliver(&self, draft: ResultDraft) -> TaskStatus {
        let job_id = draft.job_id;
        let outcome = match self.results.record(draft).await {
            Ok(outcome) => outcome,
            Err(ScanError::NotFound(_)) => return TaskStatus::Skipped { job_status: None },
            Err(err) => {
                tracing::error!(target: "scan::worker", job_id = %job_id, error = %err, "result delivery failed");
                return TaskStatus::Retry {
                    error: err.to_string(),
                };
            }
        };

        if outcome.needs_progress_signal()
            && let Err(err) = self.status.on_result(job_id).await
        {
            tracing::error!(target: "scan::worker", job_id = %job_id, error = %err, "progress update failed");
            return TaskStatus::Retry {
                error: err.to_string(),
            };
        }
        TaskStatus::Recorded(outcome)
    }
}

#[async_trait]
impl TaskHandler for ScanTaskHandler {
    async fn handle(&self, lease: &TaskLease) -> TaskStatus {
        let task = &lease.task;

        let current = match self.status.snapshot(task.job_id).await {
            Ok(snapshot) => snapshot.status,
            Err(ScanError::NotFound(_)) => {
                tracing::warn!(target: "scan::worker", job_id = %task.job_id, "task for unknown job dropped");
                return TaskStatus::Skipped { job_status: None };
            }
            Err(err) => {
                return TaskStatus::Retry {
                    error: err.to_string(),
                };
            }
        };
        if current.is_terminal() {
            tracing::debug!(
                target: "scan::worker",
                job_id = %task.job_id,
                check = %task.check_type,
                status = %current,
                "job already terminal, check skipped"
            );
            self.emit(
                task,
                ScanEventPayload::TaskSkipped {
                    check_type: task.check_type.clone(),
                    job_status: current,
                },
            )
            .await;
            return TaskStatus::Skipped {
                job_status: Some(current),
            };
        }

        if let Err(err) = self.status.mark_running(task.job_id).await {
            tracing::warn!(target: "scan::worker", job_id = %task.job_id, error = %err, "could not mark job running");
        }
        self.emit(
            task,
            ScanEventPayload::TaskStarted {
                check_type: task.check_type.clone(),
                attempt: task.attempt,
                worker_id: lease.lease_owner.clone(),
            },
        )
        .await;

        let execution = self.executor.execute(task).await;
        if matches!(execution, Execution::TimedOut(_)) && self.timeouts.should_retry(task.attempt) {
            let next = task.next_attempt();
            tracing::info!(
                target: "scan::worker",
                job_id = %task.job_id,
                check = %task.check_type,
                attempt = next.attempt,
                "timed out check requeued"
            );
            self.emit(
                task,
                ScanEventPayload::TaskRequeued {
                    check_type: task.check_type.clone(),
                    attempt: next.attempt,
                },
            )
            .await;
            return TaskStatus::Requeue {
                task: Box::new(next),
            };
        }

        self.deliver(execution.into_draft()).await
    }
}
