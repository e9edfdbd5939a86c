use std::time::Duration;

use chrono::{DateTime, Utc};
use scanward_model::{CheckConfig, CheckType, ResolvedTarget, ScanJob, ScanJobId, TaskId};
use serde::{Deserialize, Serialize};

/// Ephemeral dispatch unit: one check of one job. Lives only in the queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckTask {
    pub id: TaskId,
    pub job_id: ScanJobId,
    pub check_type: CheckType,
    pub target: ResolvedTarget,
    pub config: CheckConfig,
    /// Execution deadline in seconds.
    pub deadline_secs: u64,
    /// 1-based execution attempt.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl CheckTask {
    pub fn for_job(job: &ScanJob, check_type: CheckType, deadline: Duration) -> Self {
        Self {
            id: TaskId::new(),
            job_id: job.id,
            config: job.config.slice_for(&check_type),
            check_type,
            target: job.resolved.clone(),
            deadline_secs: deadline.as_secs().max(1),
            attempt: 1,
            enqueued_at: Utc::now(),
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    /// Copy for another execution attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            enqueued_at: Utc::now(),
            ..self.clone()
        }
    }
}
