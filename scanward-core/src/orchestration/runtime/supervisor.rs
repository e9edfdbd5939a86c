use std::{any::type_name_of_val, fmt, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::orchestration::{
    config::OrchestratorConfig,
    lease::{DequeueRequest, TaskLease},
    queue::TaskQueue,
    recovery::QueuedJobSweeper,
    worker::{TaskHandler, TaskStatus},
};

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Supervises the worker pool and the lease housekeeper inside a single
/// process.
pub struct ScanRuntime {
    config: OrchestratorConfig,
    queue: Arc<dyn TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    sweeper: Option<QueuedJobSweeper>,
    shutdown_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ScanRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self
            .handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("ScanRuntime")
            .field("config", &self.config)
            .field("queue_type", &type_name_of_val(self.queue.as_ref()))
            .field("handler_type", &type_name_of_val(self.handler.as_ref()))
            .field("sweeper", &self.sweeper)
            .field("running_tasks", &running)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl ScanRuntime {
    pub fn new(
        config: OrchestratorConfig,
        queue: Arc<dyn TaskQueue>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        Self {
            config,
            queue,
            handler,
            sweeper: None,
            shutdown_token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Let the housekeeper re-dispatch stale queued jobs on every tick.
    pub fn with_sweeper(mut self, sweeper: QueuedJobSweeper) -> Self {
        self.sweeper = Some(sweeper);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn queue(&self) -> Arc<dyn TaskQueue> {
        Arc::clone(&self.queue)
    }

    /// Token cancelled when the runtime shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Spawn the worker pool and the housekeeper. Calling it twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            tracing::warn!(target: "scan::worker", "scan runtime already started");
            return Ok(());
        }

        let parallelism = self.config.workers.parallelism.max(1);
        let worker_group = format!("scan-{}", std::process::id());
        for i in 0..parallelism {
            handles.push(self.spawn_worker(format!("{worker_group}-w{i}")));
        }
        handles.push(self.spawn_housekeeper());

        tracing::info!(target: "scan::worker", workers = parallelism, "scan runtime started");
        Ok(())
    }

    fn spawn_worker(&self, worker_id: String) -> JoinHandle<()> {
        let queue = self.queue();
        let handler = Arc::clone(&self.handler);
        let shutdown = self.shutdown_token.clone();
        let grace = self.config.lease.grace();
        let idle_poll = self.config.workers.idle_poll();
        let error_backoff = self.config.workers.error_backoff();

        tokio::spawn(async move {
            loop {
                if shutdown.is_cancelled() {
                    tracing::info!(target: "scan::worker", worker = %worker_id, "worker shutting down");
                    break;
                }

                let request = DequeueRequest {
                    worker_id: worker_id.clone(),
                    grace,
                };
                match queue.dequeue(request).await {
                    Ok(Some(lease)) => {
                        let status = handler.handle(&lease).await;
                        let backoff = matches!(status, TaskStatus::Retry { .. });
                        settle(queue.as_ref(), &worker_id, &lease, status).await;
                        if backoff {
                            tokio::time::sleep(error_backoff).await;
                        }
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            _ = tokio::time::sleep(idle_poll) => {}
                        }
                    }
                    Err(err) => {
                        tracing::error!(target: "scan::worker", worker = %worker_id, "dequeue error: {err}");
                        tokio::time::sleep(error_backoff).await;
                    }
                }
            }
        })
    }

    fn spawn_housekeeper(&self) -> JoinHandle<()> {
        let queue = self.queue();
        let sweeper = self.sweeper.clone();
        let interval = self.config.lease.housekeeper_interval();
        let shutdown = self.shutdown_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!(target: "scan::queue", "housekeeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match queue.scan_expired_leases().await {
                            Ok(0) => {}
                            Ok(resurrected) => {
                                tracing::info!(target: "scan::queue", resurrected, "expired leases returned to ready");
                            }
                            Err(err) => {
                                tracing::warn!(target: "scan::queue", "housekeeper scan_expired_leases error: {err}");
                            }
                        }
                        if let Some(sweeper) = &sweeper {
                            match sweeper.sweep().await {
                                Ok(report) if report.dispatched + report.failed > 0 => {
                                    tracing::info!(
                                        target: "scan::dispatch",
                                        dispatched = report.dispatched,
                                        failed = report.failed,
                                        errors = report.errors,
                                        "stale queued jobs recovered"
                                    );
                                }
                                Ok(_) => {}
                                Err(err) => {
                                    tracing::warn!(target: "scan::dispatch", "housekeeper stale job sweep error: {err}");
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    /// Stop accepting work and wait (bounded) for in-flight tasks.
    ///
    /// Tasks still running when the join timeout elapses keep their leases;
    /// the housekeeper of the next runtime redelivers them.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!(target: "scan::worker", "initiating graceful shutdown of scan runtime");
        self.shutdown_token.cancel();

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::warn!(target: "scan::worker", "worker task failed: {err:?}"),
                Err(_) => tracing::warn!(target: "scan::worker", "worker task timed out during shutdown"),
            }
        }

        tracing::info!(target: "scan::worker", "scan runtime shutdown complete");
        Ok(())
    }
}

/// Acknowledge or return the lease according to the handler's verdict.
async fn settle(queue: &dyn TaskQueue, worker_id: &str, lease: &TaskLease, status: TaskStatus) {
    let lease_id = lease.lease_id;
    let outcome = match status {
        TaskStatus::Recorded(_) | TaskStatus::Skipped { .. } => queue.ack(lease_id).await,
        TaskStatus::Requeue { task } => queue.requeue(lease_id, *task).await,
        TaskStatus::Retry { error } => {
            tracing::warn!(
                target: "scan::worker",
                worker = %worker_id,
                job_id = %lease.task.job_id,
                check = %lease.task.check_type,
                error = %error,
                "task returned for redelivery"
            );
            queue.requeue(lease_id, lease.task.clone()).await
        }
    };
    if let Err(err) = outcome {
        tracing::error!(
            target: "scan::worker",
            worker = %worker_id,
            lease = %lease_id,
            "queue settle error: {err}"
        );
    }
}
