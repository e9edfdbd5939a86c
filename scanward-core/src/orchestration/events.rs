use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanward_model::{
    CheckType, OrganizationId, ResultStatus, ScanJobId, ScanStatus, Severity,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Envelope attached to every scan lifecycle event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanEvent {
    pub event_id: Uuid,
    pub job_id: ScanJobId,
    pub occurred_at: DateTime<Utc>,
    pub payload: ScanEventPayload,
}

impl ScanEvent {
    pub fn new(job_id: ScanJobId, payload: ScanEventPayload) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            job_id,
            occurred_at: Utc::now(),
            payload,
        }
    }

    /// Whether this event ends the job's lifecycle stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            ScanEventPayload::Completed
                | ScanEventPayload::Cancelled
                | ScanEventPayload::DispatchFailed { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEventPayload {
    Submitted {
        organization_id: OrganizationId,
        checks: Vec<CheckType>,
    },
    Dispatched {
        tasks: usize,
    },
    DispatchFailed {
        reason: String,
    },
    Started,
    TaskStarted {
        check_type: CheckType,
        attempt: u32,
        worker_id: String,
    },
    TaskSkipped {
        check_type: CheckType,
        job_status: ScanStatus,
    },
    TaskRequeued {
        check_type: CheckType,
        attempt: u32,
    },
    ResultRecorded {
        check_type: CheckType,
        status: ResultStatus,
        findings: u32,
        severity: Severity,
        after_cancel: bool,
    },
    DuplicateDelivery {
        check_type: CheckType,
    },
    LateDelivery {
        check_type: CheckType,
        job_status: ScanStatus,
    },
    Progress {
        progress: u8,
    },
    Completed,
    Cancelled,
}

impl ScanEventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanEventPayload::Submitted { .. } => "submitted",
            ScanEventPayload::Dispatched { .. } => "dispatched",
            ScanEventPayload::DispatchFailed { .. } => "dispatch_failed",
            ScanEventPayload::Started => "started",
            ScanEventPayload::TaskStarted { .. } => "task_started",
            ScanEventPayload::TaskSkipped { .. } => "task_skipped",
            ScanEventPayload::TaskRequeued { .. } => "task_requeued",
            ScanEventPayload::ResultRecorded { .. } => "result_recorded",
            ScanEventPayload::DuplicateDelivery { .. } => "duplicate_delivery",
            ScanEventPayload::LateDelivery { .. } => "late_delivery",
            ScanEventPayload::Progress { .. } => "progress",
            ScanEventPayload::Completed => "completed",
            ScanEventPayload::Cancelled => "cancelled",
        }
    }
}

/// Abstraction over event fan-out consumed by the orchestration components.
#[async_trait]
pub trait ScanEventPublisher: Send + Sync {
    async fn publish(&self, event: ScanEvent) -> Result<()>;
}

/// Publisher that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl ScanEventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: ScanEvent) -> Result<()> {
        Ok(())
    }
}
