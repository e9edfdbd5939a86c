use std::{collections::BTreeMap, time::Duration};

use scanward_model::{CheckType, Severity};
use serde::{Deserialize, Serialize};

/// Global knobs that tune orchestrator behaviour.
///
/// All fields carry defaults so deployments can override a single section
/// without supplying a full configuration payload.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Worker pool sizing and polling cadence.
    pub workers: WorkerConfig,
    /// Lease grace and housekeeping cadence.
    pub lease: LeaseConfig,
    /// Per-check execution deadlines.
    pub deadlines: DeadlineConfig,
    /// What a timed-out check turns into.
    pub timeouts: TimeoutPolicy,
    /// Optimistic concurrency retry budget for job status writes.
    pub status: StatusConfig,
    /// In-process event bus sizing.
    pub events: EventConfig,
    /// Re-dispatch of jobs stranded in `queued`.
    pub recovery: RecoveryConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of competing workers pulling check tasks.
    pub parallelism: usize,
    /// Sleep between polls when the queue is empty (ms).
    pub idle_poll_ms: u64,
    /// Sleep after a queue error before polling again (ms).
    pub error_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            idle_poll_ms: 50,
            error_backoff_ms: 500,
        }
    }
}

impl WorkerConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Lease tuning for worker tasks.
///
/// A lease lives for the task deadline plus `grace_secs`; a worker that
/// dies mid-task therefore releases its task for redelivery shortly after
/// the deadline would have fired anyway.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Extra lease time beyond the task deadline (seconds).
    pub grace_secs: u64,
    /// Housekeeping cadence for scanning expired leases (ms).
    pub housekeeper_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            grace_secs: 30,
            housekeeper_interval_ms: 15_000,
        }
    }
}

impl LeaseConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn housekeeper_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeper_interval_ms)
    }
}

/// Jobs left `queued` with no pending task for longer than `stale_after_ms`
/// are dispatched again by the housekeeper.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub stale_after_ms: u64,
    /// Jobs examined per housekeeper tick.
    pub batch_size: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 60_000,
            batch_size: 100,
        }
    }
}

impl RecoveryConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Deadline for checks without a per-check entry (seconds).
    pub default_secs: u64,
    /// Upper bound for any deadline, including job overrides (seconds).
    pub max_secs: u64,
    /// Per-check deadlines keyed by check name (seconds).
    pub per_check: BTreeMap<String, u64>,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        let per_check = [
            (CheckType::PING, 30),
            (CheckType::PORTSCAN, 900),
            (CheckType::HEADERS, 30),
            (CheckType::SSL, 30),
            (CheckType::DNS, 60),
            (CheckType::BRUTEFORCE, 300),
        ]
        .into_iter()
        .map(|(name, secs)| (name.to_string(), secs))
        .collect();

        Self {
            default_secs: 120,
            max_secs: 3_600,
            per_check,
        }
    }
}

impl DeadlineConfig {
    /// Resolve a task deadline: job override, else per-check, else default,
    /// clamped to `[1s, max_secs]`.
    pub fn deadline_for(&self, check: &CheckType, job_override: Option<u64>) -> Duration {
        let secs = job_override
            .or_else(|| self.per_check.get(check.as_str()).copied())
            .unwrap_or(self.default_secs);
        Duration::from_secs(secs.clamp(1, self.max_secs.max(1)))
    }
}

/// Classification of a check that ran past its deadline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Findings recorded on the timeout result.
    pub findings: u32,
    /// Severity recorded on the timeout result.
    pub severity: Severity,
    /// Re-queue a timed-out task instead of recording it, until
    /// `max_attempts` executions have been made.
    pub retry_on_timeout: bool,
    pub max_attempts: u32,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            findings: 0,
            severity: Severity::Info,
            retry_on_timeout: false,
            max_attempts: 1,
        }
    }
}

impl TimeoutPolicy {
    /// Whether a task that timed out on `attempt` (1-based) gets another run.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.retry_on_timeout && attempt < self.max_attempts
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Conditional-write attempts before a status update gives up.
    pub max_cas_attempts: u32,
    /// Upper bound for the jittered pause between attempts (ms).
    pub cas_backoff_max_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            max_cas_attempts: 16,
            cas_backoff_max_ms: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    pub channel_capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1_024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_resolution_order() {
        let deadlines = DeadlineConfig::default();
        let portscan = CheckType::new("portscan").unwrap();
        let custom = CheckType::new("whois").unwrap();

        assert_eq!(deadlines.deadline_for(&portscan, None), Duration::from_secs(900));
        assert_eq!(deadlines.deadline_for(&custom, None), Duration::from_secs(120));
        assert_eq!(deadlines.deadline_for(&portscan, Some(5)), Duration::from_secs(5));
        assert_eq!(
            deadlines.deadline_for(&portscan, Some(1_000_000)),
            Duration::from_secs(3_600)
        );
        assert_eq!(deadlines.deadline_for(&portscan, Some(0)), Duration::from_secs(1));
    }

    #[test]
    fn timeout_retry_budget() {
        let mut policy = TimeoutPolicy::default();
        assert!(!policy.should_retry(1));

        policy.retry_on_timeout = true;
        policy.max_attempts = 3;
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn partial_config_deserializes() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{ "workers": { "parallelism": 2 } }"#).unwrap();
        assert_eq!(config.workers.parallelism, 2);
        assert_eq!(config.workers.idle_poll_ms, 50);
        assert_eq!(config.status.max_cas_attempts, 16);
    }
}
