use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::CheckTask;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease metadata returned when a worker dequeues a task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskLease {
    pub lease_id: LeaseId,
    pub task: CheckTask,
    pub lease_owner: String,
    pub expires_at: DateTime<Utc>,
}

impl TaskLease {
    /// Lease that outlives the task deadline by `grace`.
    pub fn new(task: CheckTask, owner: String, grace: Duration) -> Self {
        let ttl = task.deadline().saturating_add(grace);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            lease_id: LeaseId::new(),
            expires_at,
            lease_owner: owner,
            task,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Request object to dequeue the next ready task.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DequeueRequest {
    pub worker_id: String,
    /// Lease time granted beyond the task deadline.
    pub grace: Duration,
}
