//! Postgres implementations of the queue and persistence ports.
//!
//! Queries are runtime-checked (`sqlx::query` + binds) so the crate builds
//! without a live database. Schema lives in `migrations/`.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scanward_model::{
    CheckPayload, CheckType, OrganizationId, ResolvedTarget, ResultDraft, ScanJob, ScanJobId,
    ScanResult, ScanTarget, TargetId,
};
use sqlx::{FromRow, PgPool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, ScanError};

use super::{
    lease::{DequeueRequest, LeaseId, TaskLease},
    queue::{LeaseExpiryScanner, QueueDepth, TaskQueue},
    store::{
        ResultRepository, ScanJobRepository, TargetDirectory, TargetRecord, UpsertOutcome,
    },
    task::CheckTask,
};

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    target_id: Option<Uuid>,
    target_url: Option<String>,
    resolved_url: String,
    resolved_host: String,
    organization_id: Uuid,
    initiated_by: Uuid,
    status: String,
    progress: i16,
    checks: Vec<String>,
    config: serde_json::Value,
    version: i64,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str = "id, target_id, target_url, resolved_url, resolved_host, \
     organization_id, initiated_by, status, progress, checks, config, version, \
     failure_reason, created_at, started_at, completed_at, updated_at";

impl TryFrom<JobRow> for ScanJob {
    type Error = ScanError;

    fn try_from(row: JobRow) -> Result<Self> {
        let target = match (row.target_id, row.target_url) {
            (Some(target_id), _) => ScanTarget::Saved {
                target_id: TargetId::from(target_id),
            },
            (None, Some(url)) => ScanTarget::Url { url },
            (None, None) => {
                return Err(ScanError::Internal(format!(
                    "scan job {} has neither target id nor url",
                    row.id
                )));
            }
        };
        let checks = row
            .checks
            .into_iter()
            .map(CheckType::new)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(ScanJob {
            id: ScanJobId::from(row.id),
            target,
            resolved: ResolvedTarget {
                url: row.resolved_url,
                host: row.resolved_host,
            },
            organization_id: OrganizationId::from(row.organization_id),
            initiated_by: row.initiated_by.into(),
            status: row.status.parse()?,
            progress: row.progress.clamp(0, 100) as u8,
            checks,
            config: serde_json::from_value(row.config)?,
            version: row.version,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PostgresScanJobRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresScanJobRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresScanJobRepository")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresScanJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanJobRepository for PostgresScanJobRepository {
    async fn insert(&self, job: &ScanJob) -> Result<()> {
        let checks: Vec<String> = job.checks.iter().map(|c| c.as_str().to_owned()).collect();
        sqlx::query(
            r#"
            INSERT INTO scan_jobs (
                id, target_id, target_url, resolved_url, resolved_host,
                organization_id, initiated_by, status, progress, checks, config,
                version, failure_reason, created_at, started_at, completed_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(job.id.to_uuid())
        .bind(job.target.target_id().map(|id| id.to_uuid()))
        .bind(job.target.url())
        .bind(&job.resolved.url)
        .bind(&job.resolved.host)
        .bind(job.organization_id.to_uuid())
        .bind(job.initiated_by.to_uuid())
        .bind(job.status.as_str())
        .bind(i16::from(job.progress))
        .bind(checks)
        .bind(serde_json::to_value(&job.config)?)
        .bind(job.version)
        .bind(job.failure_reason.as_deref())
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: ScanJobId) -> Result<Option<ScanJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.to_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(ScanJob::try_from)
            .transpose()
    }

    async fn compare_and_swap(&self, expected_version: i64, next: &ScanJob) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = $3,
                progress = $4,
                version = $5,
                failure_reason = $6,
                started_at = $7,
                completed_at = $8,
                updated_at = $9
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(next.id.to_uuid())
        .bind(expected_version)
        .bind(next.status.as_str())
        .bind(i16::from(next.progress))
        .bind(next.version)
        .bind(next.failure_reason.as_deref())
        .bind(next.started_at)
        .bind(next.completed_at)
        .bind(next.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(true);
        }

        let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM scan_jobs WHERE id = $1")
            .bind(next.id.to_uuid())
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(ScanError::not_found(next.id))
        }
    }

    async fn list_by_organization(
        &self,
        organization_id: OrganizationId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ScanJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE organization_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(organization_id.to_uuid())
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ScanJob::try_from)
            .collect()
    }

    async fn list_stale_queued(
        &self,
        updated_before: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScanJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs WHERE status = 'queued' AND updated_at < $1 \
             ORDER BY updated_at, id LIMIT $2"
        );
        sqlx::query_as::<_, JobRow>(&sql)
            .bind(updated_before)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ScanJob::try_from)
            .collect()
    }
}

#[derive(Debug, FromRow)]
struct ResultRow {
    seq: i64,
    id: Uuid,
    scan_id: Uuid,
    check_type: String,
    status: String,
    payload: serde_json::Value,
    findings: i32,
    severity: String,
    after_cancel: bool,
    recorded_at: DateTime<Utc>,
}

const RESULT_COLUMNS: &str =
    "seq, id, scan_id, check_type, status, payload, findings, severity, after_cancel, recorded_at";

impl TryFrom<ResultRow> for ScanResult {
    type Error = ScanError;

    fn try_from(row: ResultRow) -> Result<Self> {
        let payload: CheckPayload = serde_json::from_value(row.payload)?;
        Ok(ScanResult {
            id: row.id.into(),
            job_id: row.scan_id.into(),
            check_type: CheckType::new(row.check_type)?,
            status: row.status.parse()?,
            payload,
            findings: u32::try_from(row.findings).unwrap_or_default(),
            severity: row.severity.parse()?,
            sequence: row.seq,
            after_cancel: row.after_cancel,
            recorded_at: row.recorded_at,
        })
    }
}

#[derive(Clone)]
pub struct PostgresResultRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresResultRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresResultRepository")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultRepository for PostgresResultRepository {
    async fn upsert(&self, draft: ResultDraft, after_cancel: bool) -> Result<UpsertOutcome> {
        let candidate = draft.into_result(0, after_cancel);
        let sql = format!(
            "INSERT INTO scan_results \
                 (id, scan_id, check_type, status, payload, findings, severity, after_cancel, recorded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (scan_id, check_type) DO NOTHING \
             RETURNING {RESULT_COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, ResultRow>(&sql)
            .bind(candidate.id.to_uuid())
            .bind(candidate.job_id.to_uuid())
            .bind(candidate.check_type.as_str())
            .bind(candidate.status.as_str())
            .bind(serde_json::to_value(&candidate.payload)?)
            .bind(i32::try_from(candidate.findings).unwrap_or(i32::MAX))
            .bind(candidate.severity.as_str())
            .bind(candidate.after_cancel)
            .bind(candidate.recorded_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            return Ok(UpsertOutcome::Inserted(row.try_into()?));
        }

        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM scan_results WHERE scan_id = $1 AND check_type = $2"
        );
        let existing = sqlx::query_as::<_, ResultRow>(&sql)
            .bind(candidate.job_id.to_uuid())
            .bind(candidate.check_type.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(UpsertOutcome::Duplicate(existing.try_into()?))
    }

    async fn mark_after_cancel(&self, job_id: ScanJobId, check_type: &CheckType) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE scan_results SET after_cancel = TRUE \
             WHERE scan_id = $1 AND check_type = $2 AND NOT after_cancel",
        )
        .bind(job_id.to_uuid())
        .bind(check_type.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn list(&self, job_id: ScanJobId) -> Result<Vec<ScanResult>> {
        let sql = format!("SELECT {RESULT_COLUMNS} FROM scan_results WHERE scan_id = $1 ORDER BY seq");
        sqlx::query_as::<_, ResultRow>(&sql)
            .bind(job_id.to_uuid())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ScanResult::try_from)
            .collect()
    }

    async fn count(&self, job_id: ScanJobId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scan_results WHERE scan_id = $1")
            .bind(job_id.to_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

/// Durable task queue over the `check_tasks` table.
#[derive(Clone)]
pub struct PostgresTaskQueue {
    pool: PgPool,
}

impl fmt::Debug for PostgresTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTaskQueue")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

impl PostgresTaskQueue {
    /// Create the queue and verify DB health and schema.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                ScanError::QueueUnavailable(format!("task queue failed Postgres health check: {e}"))
            })?;

        let idx_exists = sqlx::query_scalar::<_, i32>(
            "SELECT 1 FROM pg_indexes WHERE indexname = $1 LIMIT 1",
        )
        .bind("idx_check_tasks_ready_dequeue")
        .fetch_optional(&pool)
        .await?
        .is_some();
        if !idx_exists {
            return Err(ScanError::QueueUnavailable(
                "required index idx_check_tasks_ready_dequeue is missing; run migrations".into(),
            ));
        }

        info!(target: "scan::queue", "task queue connected to Postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    async fn enqueue_batch(&self, tasks: Vec<CheckTask>) -> Result<usize> {
        let unavailable = |e: sqlx::Error| ScanError::QueueUnavailable(format!("enqueue batch failed: {e}"));
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        let count = tasks.len();
        for task in tasks {
            sqlx::query(
                r#"
                INSERT INTO check_tasks
                    (id, scan_id, check_type, payload, state, attempt, deadline_secs, enqueued_at)
                VALUES ($1, $2, $3, $4, 'ready', $5, $6, $7)
                "#,
            )
            .bind(task.id.to_uuid())
            .bind(task.job_id.to_uuid())
            .bind(task.check_type.as_str())
            .bind(serde_json::to_value(&task)?)
            .bind(i32::try_from(task.attempt).unwrap_or(i32::MAX))
            .bind(i64::try_from(task.deadline_secs).unwrap_or(i64::MAX))
            .bind(task.enqueued_at)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }
        tx.commit().await.map_err(unavailable)?;
        debug!(target: "scan::queue", tasks = count, "batch enqueued");
        Ok(count)
    }

    async fn dequeue(&self, request: DequeueRequest) -> Result<Option<TaskLease>> {
        let mut tx = self.pool.begin().await?;
        let picked: Option<(Uuid, serde_json::Value)> = sqlx::query_as(
            r#"
            SELECT id, payload
            FROM check_tasks
            WHERE state = 'ready'
            ORDER BY enqueued_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some((row_id, payload)) = picked else {
            return Ok(None);
        };
        let task: CheckTask = serde_json::from_value(payload)?;
        let lease = TaskLease::new(task, request.worker_id, request.grace);

        let updated = sqlx::query(
            r#"
            UPDATE check_tasks
            SET state = 'leased',
                lease_id = $2,
                lease_owner = $3,
                lease_expires_at = $4,
                updated_at = NOW()
            WHERE id = $1 AND state = 'ready'
            "#,
        )
        .bind(row_id)
        .bind(lease.lease_id.0)
        .bind(&lease.lease_owner)
        .bind(lease.expires_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(lease))
    }

    async fn ack(&self, lease_id: LeaseId) -> Result<()> {
        let removed = sqlx::query("DELETE FROM check_tasks WHERE lease_id = $1")
            .bind(lease_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if removed == 0 {
            debug!(target: "scan::queue", lease = %lease_id, "ack for unknown lease ignored");
        }
        Ok(())
    }

    async fn requeue(&self, lease_id: LeaseId, task: CheckTask) -> Result<()> {
        let updated = sqlx::query(
            r#"
            UPDATE check_tasks
            SET state = 'ready',
                payload = $2,
                attempt = $3,
                lease_id = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                enqueued_at = NOW(),
                updated_at = NOW()
            WHERE lease_id = $1
            "#,
        )
        .bind(lease_id.0)
        .bind(serde_json::to_value(&task)?)
        .bind(i32::try_from(task.attempt).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            debug!(target: "scan::queue", lease = %lease_id, "requeue for unknown lease ignored");
        }
        Ok(())
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let (ready, leased): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FILTER (WHERE state = 'ready'),
                   COUNT(*) FILTER (WHERE state = 'leased')
            FROM check_tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueDepth {
            ready: usize::try_from(ready).unwrap_or_default(),
            leased: usize::try_from(leased).unwrap_or_default(),
        })
    }

    async fn pending_for_job(&self, job_id: ScanJobId) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM check_tasks WHERE scan_id = $1")
            .bind(job_id.to_uuid())
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[async_trait]
impl LeaseExpiryScanner for PostgresTaskQueue {
    async fn scan_expired_leases(&self) -> Result<u64> {
        let resurrected = sqlx::query(
            r#"
            UPDATE check_tasks
            SET state = 'ready',
                lease_id = NULL,
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE state = 'leased'
              AND lease_expires_at IS NOT NULL
              AND lease_expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(resurrected)
    }
}

/// Read-only view of the externally owned `targets` table.
#[derive(Clone)]
pub struct PostgresTargetDirectory {
    pool: PgPool,
}

impl fmt::Debug for PostgresTargetDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresTargetDirectory").finish_non_exhaustive()
    }
}

impl PostgresTargetDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TargetDirectory for PostgresTargetDirectory {
    async fn lookup(&self, id: TargetId) -> Result<Option<TargetRecord>> {
        let row: Option<(Uuid, Uuid, String)> =
            sqlx::query_as("SELECT id, organization_id, address FROM targets WHERE id = $1")
                .bind(id.to_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, organization_id, address)| TargetRecord {
            id: id.into(),
            organization_id: organization_id.into(),
            address,
        }))
    }
}
