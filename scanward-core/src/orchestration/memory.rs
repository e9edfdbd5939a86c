//! In-process implementations of the queue and persistence ports.
//!
//! Used when no database is configured and throughout the test-suite.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanward_model::{
    CheckType, OrganizationId, ResultDraft, ScanJob, ScanJobId, ScanResult, ScanStatus, TargetId,
};
use tokio::sync::{Mutex, RwLock};

use crate::error::{Result, ScanError};

use super::{
    lease::{DequeueRequest, LeaseId, TaskLease},
    queue::{LeaseExpiryScanner, QueueDepth, TaskQueue},
    store::{
        ResultRepository, ScanJobRepository, TargetDirectory, TargetRecord,
        UpsertOutcome,
    },
    task::CheckTask,
};

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<CheckTask>,
    leased: HashMap<LeaseId, TaskLease>,
}

/// FIFO task queue guarded by a single mutex.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<QueueState>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue_batch(&self, tasks: Vec<CheckTask>) -> Result<usize> {
        let mut state = self.state.lock().await;
        let count = tasks.len();
        state.ready.extend(tasks);
        Ok(count)
    }

    async fn dequeue(&self, request: DequeueRequest) -> Result<Option<TaskLease>> {
        let mut state = self.state.lock().await;
        let Some(task) = state.ready.pop_front() else {
            return Ok(None);
        };
        let lease = TaskLease::new(task, request.worker_id, request.grace);
        state.leased.insert(lease.lease_id, lease.clone());
        Ok(Some(lease))
    }

    async fn ack(&self, lease_id: LeaseId) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.leased.remove(&lease_id).is_none() {
            tracing::debug!(target: "scan::queue", lease = %lease_id, "ack for unknown lease ignored");
        }
        Ok(())
    }

    async fn requeue(&self, lease_id: LeaseId, task: CheckTask) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.leased.remove(&lease_id).is_none() {
            tracing::debug!(target: "scan::queue", lease = %lease_id, "requeue for unknown lease ignored");
            return Ok(());
        }
        state.ready.push_back(task);
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let state = self.state.lock().await;
        Ok(QueueDepth {
            ready: state.ready.len(),
            leased: state.leased.len(),
        })
    }

    async fn pending_for_job(&self, job_id: ScanJobId) -> Result<usize> {
        let state = self.state.lock().await;
        let ready = state.ready.iter().filter(|task| task.job_id == job_id).count();
        let leased = state
            .leased
            .values()
            .filter(|lease| lease.task.job_id == job_id)
            .count();
        Ok(ready + leased)
    }
}

#[async_trait]
impl LeaseExpiryScanner for InMemoryTaskQueue {
    async fn scan_expired_leases(&self) -> Result<u64> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let expired: Vec<LeaseId> = state
            .leased
            .values()
            .filter(|lease| lease.is_expired(now))
            .map(|lease| lease.lease_id)
            .collect();

        let mut resurrected = 0u64;
        for lease_id in expired {
            if let Some(lease) = state.leased.remove(&lease_id) {
                state.ready.push_back(lease.task);
                resurrected += 1;
            }
        }
        Ok(resurrected)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryScanJobRepository {
    jobs: RwLock<HashMap<ScanJobId, ScanJob>>,
}

impl InMemoryScanJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanJobRepository for InMemoryScanJobRepository {
    async fn insert(&self, job: &ScanJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(ScanError::Internal(format!("scan job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: ScanJobId) -> Result<Option<ScanJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn compare_and_swap(&self, expected_version: i64, next: &ScanJob) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&next.id) {
            Some(current) if current.version == expected_version => {
                *current = next.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(ScanError::not_found(next.id)),
        }
    }

    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ScanJob>> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<ScanJob> = jobs
            .values()
            .filter(|job| job.organization_id == organization_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn list_stale_queued(
        &self,
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScanJob>> {
        let jobs = self.jobs.read().await;
        let mut stale: Vec<ScanJob> = jobs
            .values()
            .filter(|job| job.status == ScanStatus::Queued && job.updated_at < updated_before)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        stale.truncate(limit as usize);
        Ok(stale)
    }
}

#[derive(Debug, Default)]
struct ResultState {
    by_job: HashMap<ScanJobId, Vec<ScanResult>>,
    next_sequence: i64,
}

/// Result store keyed by (job, check type); first write wins.
#[derive(Debug, Default)]
pub struct InMemoryResultRepository {
    state: Mutex<ResultState>,
}

impl InMemoryResultRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultRepository for InMemoryResultRepository {
    async fn upsert(&self, draft: ResultDraft, after_cancel: bool) -> Result<UpsertOutcome> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .by_job
            .get(&draft.job_id)
            .and_then(|rows| rows.iter().find(|row| row.check_type == draft.check_type))
        {
            return Ok(UpsertOutcome::Duplicate(existing.clone()));
        }

        state.next_sequence += 1;
        let result = draft.into_result(state.next_sequence, after_cancel);
        state
            .by_job
            .entry(result.job_id)
            .or_default()
            .push(result.clone());
        Ok(UpsertOutcome::Inserted(result))
    }

    async fn mark_after_cancel(&self, job_id: ScanJobId, check_type: &CheckType) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(row) = state
            .by_job
            .get_mut(&job_id)
            .and_then(|rows| rows.iter_mut().find(|row| &row.check_type == check_type))
        else {
            return Ok(false);
        };
        if row.after_cancel {
            return Ok(false);
        }
        row.after_cancel = true;
        Ok(true)
    }

    async fn list(&self, job_id: ScanJobId) -> Result<Vec<ScanResult>> {
        let state = self.state.lock().await;
        Ok(state.by_job.get(&job_id).cloned().unwrap_or_default())
    }

    async fn count(&self, job_id: ScanJobId) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.by_job.get(&job_id).map(Vec::len).unwrap_or(0))
    }
}

/// Static target catalogue.
#[derive(Debug, Default)]
pub struct InMemoryTargetDirectory {
    targets: RwLock<HashMap<TargetId, TargetRecord>>,
}

impl InMemoryTargetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: TargetRecord) {
        self.targets.write().await.insert(record.id, record);
    }
}

#[async_trait]
impl TargetDirectory for InMemoryTargetDirectory {
    async fn lookup(&self, id: TargetId) -> Result<Option<TargetRecord>> {
        Ok(self.targets.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanward_model::{
        CheckPayload, ResolvedTarget, ResultStatus, ScanConfig, ScanTarget, Severity, UserId,
    };
    use serde_json::json;
    use std::time::Duration;

    fn job() -> ScanJob {
        ScanJob::queued(
            ScanTarget::Url {
                url: "https://example.com".into(),
            },
            ResolvedTarget {
                url: "https://example.com/".into(),
                host: "example.com".into(),
            },
            OrganizationId::new(),
            UserId::new(),
            vec![CheckType::new("ping").unwrap(), CheckType::new("ssl").unwrap()],
            ScanConfig::default(),
        )
    }

    fn draft(job_id: ScanJobId, check: &str, findings: u32) -> ResultDraft {
        let check_type = CheckType::new(check).unwrap();
        ResultDraft {
            job_id,
            payload: CheckPayload::for_check(&check_type, json!({})),
            check_type,
            status: ResultStatus::Success,
            findings,
            severity: Severity::Low,
        }
    }

    #[tokio::test]
    async fn queue_leases_in_fifo_order_and_acks() {
        let queue = InMemoryTaskQueue::new();
        let job = job();
        let tasks: Vec<CheckTask> = job
            .checks
            .iter()
            .map(|c| CheckTask::for_job(&job, c.clone(), Duration::from_secs(5)))
            .collect();
        assert_eq!(queue.enqueue_batch(tasks).await.unwrap(), 2);

        let request = DequeueRequest {
            worker_id: "w0".into(),
            grace: Duration::from_secs(1),
        };
        let first = queue.dequeue(request.clone()).await.unwrap().unwrap();
        assert_eq!(first.task.check_type.as_str(), "ping");
        assert_eq!(
            queue.depth().await.unwrap(),
            QueueDepth { ready: 1, leased: 1 }
        );

        queue.ack(first.lease_id).await.unwrap();
        queue.ack(first.lease_id).await.unwrap();
        assert_eq!(
            queue.depth().await.unwrap(),
            QueueDepth { ready: 1, leased: 0 }
        );
    }

    #[tokio::test]
    async fn expired_leases_return_to_ready() {
        let queue = InMemoryTaskQueue::new();
        let job = job();
        let task = CheckTask::for_job(&job, job.checks[0].clone(), Duration::from_secs(1));
        queue.enqueue_batch(vec![task]).await.unwrap();

        let mut lease = queue
            .dequeue(DequeueRequest {
                worker_id: "w0".into(),
                grace: Duration::ZERO,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(queue.scan_expired_leases().await.unwrap(), 0);

        // Force expiry without waiting on the wall clock.
        lease.expires_at = Utc::now() - chrono::Duration::seconds(1);
        queue.state.lock().await.leased.insert(lease.lease_id, lease);
        assert_eq!(queue.scan_expired_leases().await.unwrap(), 1);
        assert_eq!(
            queue.depth().await.unwrap(),
            QueueDepth { ready: 1, leased: 0 }
        );
    }

    #[tokio::test]
    async fn cas_rejects_stale_versions() {
        let repo = InMemoryScanJobRepository::new();
        let job = job();
        repo.insert(&job).await.unwrap();

        let mut next = job.clone();
        next.version = 1;
        assert!(repo.compare_and_swap(0, &next).await.unwrap());
        assert!(!repo.compare_and_swap(0, &next).await.unwrap());
        assert_eq!(repo.get(job.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn stale_queued_jobs_are_listed_oldest_first() {
        let repo = InMemoryScanJobRepository::new();
        let mut old = job();
        old.updated_at = Utc::now() - chrono::Duration::minutes(10);
        let mut older = job();
        older.updated_at = Utc::now() - chrono::Duration::minutes(20);
        let mut running = job();
        running.status = ScanStatus::Running;
        running.updated_at = older.updated_at;
        let fresh = job();
        for job in [&old, &older, &running, &fresh] {
            repo.insert(job).await.unwrap();
        }

        let cutoff = Utc::now() - chrono::Duration::minutes(1);
        let stale = repo.list_stale_queued(cutoff, 10).await.unwrap();
        let ids: Vec<ScanJobId> = stale.iter().map(|job| job.id).collect();
        assert_eq!(ids, vec![older.id, old.id]);
        assert_eq!(repo.list_stale_queued(cutoff, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pending_tasks_are_counted_per_job() {
        let queue = InMemoryTaskQueue::new();
        let job = job();
        let other = self::job();
        let mut tasks: Vec<CheckTask> = job
            .checks
            .iter()
            .map(|c| CheckTask::for_job(&job, c.clone(), Duration::from_secs(5)))
            .collect();
        tasks.push(CheckTask::for_job(&other, other.checks[0].clone(), Duration::from_secs(5)));
        queue.enqueue_batch(tasks).await.unwrap();
        queue
            .dequeue(DequeueRequest {
                worker_id: "w0".into(),
                grace: Duration::from_secs(1),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(queue.pending_for_job(job.id).await.unwrap(), 2);
        assert_eq!(queue.pending_for_job(other.id).await.unwrap(), 1);
        assert_eq!(queue.pending_for_job(ScanJobId::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn after_cancel_flag_is_set_once() {
        let repo = InMemoryResultRepository::new();
        let job_id = ScanJobId::new();
        let ping = CheckType::new("ping").unwrap();
        assert!(!repo.mark_after_cancel(job_id, &ping).await.unwrap());

        repo.upsert(draft(job_id, "ping", 0), false).await.unwrap();
        assert!(repo.mark_after_cancel(job_id, &ping).await.unwrap());
        assert!(!repo.mark_after_cancel(job_id, &ping).await.unwrap());
        assert!(repo.list(job_id).await.unwrap()[0].after_cancel);
    }

    #[tokio::test]
    async fn result_upsert_is_first_write_wins() {
        let repo = InMemoryResultRepository::new();
        let job_id = ScanJobId::new();

        let first = repo.upsert(draft(job_id, "ping", 1), false).await.unwrap();
        assert!(first.is_inserted());
        let second = repo.upsert(draft(job_id, "ping", 9), false).await.unwrap();
        assert!(!second.is_inserted());
        assert_eq!(second.result().findings, 1);

        repo.upsert(draft(job_id, "ssl", 0), false).await.unwrap();
        let rows = repo.list(job_id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].sequence < rows[1].sequence);
        assert_eq!(repo.count(job_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn listing_is_scoped_and_paged() {
        let repo = InMemoryScanJobRepository::new();
        let org = OrganizationId::new();
        for _ in 0..3 {
            let mut job = job();
            job.organization_id = org;
            repo.insert(&job).await.unwrap();
        }
        repo.insert(&job()).await.unwrap();

        assert_eq!(repo.list_by_organization(org, 10, 0).await.unwrap().len(), 3);
        assert_eq!(repo.list_by_organization(org, 2, 2).await.unwrap().len(), 1);
    }
}
