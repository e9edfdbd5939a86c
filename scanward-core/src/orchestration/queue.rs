use async_trait::async_trait;
use scanward_model::ScanJobId;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::{
    lease::{DequeueRequest, LeaseId, TaskLease},
    task::CheckTask,
};

/// Durable, at-least-once work queue consumed by the worker pool.
#[async_trait]
pub trait TaskQueue: LeaseExpiryScanner + Send + Sync {
    /// Enqueue every task or none of them.
    async fn enqueue_batch(&self, tasks: Vec<CheckTask>) -> Result<usize>;

    /// Lease the next ready task, if any.
    async fn dequeue(&self, request: DequeueRequest) -> Result<Option<TaskLease>>;

    /// Remove a finished task. Acknowledging an unknown or expired lease is a no-op.
    async fn ack(&self, lease_id: LeaseId) -> Result<()>;

    /// Replace a leased task with `task` and make it ready again.
    async fn requeue(&self, lease_id: LeaseId, task: CheckTask) -> Result<()>;

    async fn depth(&self) -> Result<QueueDepth>;

    /// Ready plus leased tasks belonging to `job_id`.
    async fn pending_for_job(&self, job_id: ScanJobId) -> Result<usize>;
}

/// Capability to return expired leases to the ready set.
#[async_trait]
pub trait LeaseExpiryScanner: Send + Sync {
    /// Returns number of tasks transitioned back to ready.
    async fn scan_expired_leases(&self) -> Result<u64>;
}

/// Instantaneous queue occupancy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: usize,
    pub leased: usize,
}
