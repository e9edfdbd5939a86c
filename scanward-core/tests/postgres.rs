//! Postgres port behaviour. Needs `DATABASE_URL`; run with `--ignored`.
#![cfg(feature = "database")]

use std::time::Duration;

use anyhow::Result;
use scanward_core::orchestration::{
    CheckTask, DequeueRequest, LeaseExpiryScanner, PostgresResultRepository,
    PostgresScanJobRepository, PostgresTargetDirectory, PostgresTaskQueue, QueueDepth,
    ResultRepository, ScanJobRepository, TargetDirectory, TaskQueue,
};
use scanward_model::{
    CheckPayload, CheckType, OrganizationId, ResolvedTarget, ResultDraft, ResultStatus,
    ScanConfig, ScanJob, ScanStatus, ScanTarget, Severity, TargetId, UserId,
};
use serde_json::json;
use sqlx::PgPool;

fn job(organization_id: OrganizationId, checks: &[&str]) -> ScanJob {
    ScanJob::queued(
        ScanTarget::Url {
            url: "example.com".into(),
        },
        ResolvedTarget {
            url: "https://example.com/".into(),
            host: "example.com".into(),
        },
        organization_id,
        UserId::new(),
        checks.iter().map(|c| CheckType::new(*c).unwrap()).collect(),
        ScanConfig {
            timeout_secs: Some(20),
            ..Default::default()
        },
    )
}

fn draft(job: &ScanJob, check: &str, findings: u32) -> ResultDraft {
    let check_type = CheckType::new(check).unwrap();
    ResultDraft {
        job_id: job.id,
        payload: CheckPayload::for_check(&check_type, json!({ "findings": findings })),
        check_type,
        status: ResultStatus::Success,
        findings,
        severity: Severity::Low,
    }
}

fn worker(grace_secs: u64) -> DequeueRequest {
    DequeueRequest {
        worker_id: "pg-test-w0".into(),
        grace: Duration::from_secs(grace_secs),
    }
}

#[sqlx::test(migrator = "scanward_core::MIGRATOR")]
#[ignore = "requires Postgres"]
async fn job_repository_roundtrip_and_cas(pool: PgPool) -> Result<()> {
    let repo = PostgresScanJobRepository::new(pool);
    let org = OrganizationId::new();
    let stored = job(org, &["ping", "ssl"]);
    repo.insert(&stored).await?;

    let loaded = repo.get(stored.id).await?.expect("job stored");
    assert_eq!(loaded.checks, stored.checks);
    assert_eq!(loaded.config, stored.config);
    assert_eq!(loaded.status, ScanStatus::Queued);

    let mut next = loaded.clone();
    next.status = ScanStatus::Running;
    next.progress = 50;
    next.version = loaded.version + 1;
    assert!(repo.compare_and_swap(loaded.version, &next).await?);
    assert!(!repo.compare_and_swap(loaded.version, &next).await?);

    let reloaded = repo.get(stored.id).await?.expect("job stored");
    assert_eq!(reloaded.status, ScanStatus::Running);
    assert_eq!(reloaded.progress, 50);

    repo.insert(&job(org, &["dns"])).await?;
    repo.insert(&job(OrganizationId::new(), &["dns"])).await?;
    assert_eq!(repo.list_by_organization(org, 10, 0).await?.len(), 2);
    assert_eq!(repo.list_by_organization(org, 1, 1).await?.len(), 1);
    Ok(())
}

#[sqlx::test(migrator = "scanward_core::MIGRATOR")]
#[ignore = "requires Postgres"]
async fn result_upsert_keeps_the_first_write(pool: PgPool) -> Result<()> {
    let jobs = PostgresScanJobRepository::new(pool.clone());
    let results = PostgresResultRepository::new(pool);
    let stored = job(OrganizationId::new(), &["ping", "ssl"]);
    jobs.insert(&stored).await?;

    let first = results.upsert(draft(&stored, "ping", 1), false).await?;
    assert!(first.is_inserted());
    let again = results.upsert(draft(&stored, "ping", 7), false).await?;
    assert!(!again.is_inserted());
    assert_eq!(again.result().findings, 1);

    results.upsert(draft(&stored, "ssl", 0), true).await?;
    let rows = results.list(stored.id).await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].check_type.as_str(), "ping");
    assert!(rows[1].after_cancel);
    assert_eq!(results.count(stored.id).await?, 2);
    Ok(())
}

#[sqlx::test(migrator = "scanward_core::MIGRATOR")]
#[ignore = "requires Postgres"]
async fn queue_leases_acks_and_resurrects(pool: PgPool) -> Result<()> {
    let jobs = PostgresScanJobRepository::new(pool.clone());
    let queue = PostgresTaskQueue::new(pool.clone()).await?;
    let stored = job(OrganizationId::new(), &["ping", "ssl"]);
    jobs.insert(&stored).await?;

    let tasks: Vec<CheckTask> = stored
        .checks
        .iter()
        .map(|c| CheckTask::for_job(&stored, c.clone(), Duration::from_secs(20)))
        .collect();
    assert_eq!(queue.enqueue_batch(tasks).await?, 2);

    let first = queue.dequeue(worker(5)).await?.expect("ready task");
    let second = queue.dequeue(worker(5)).await?.expect("ready task");
    assert_ne!(first.task.id, second.task.id);
    assert!(queue.dequeue(worker(5)).await?.is_none());
    assert_eq!(queue.depth().await?, QueueDepth { ready: 0, leased: 2 });

    queue.ack(first.lease_id).await?;
    queue.requeue(second.lease_id, second.task.next_attempt()).await?;
    assert_eq!(queue.depth().await?, QueueDepth { ready: 1, leased: 0 });

    let retried = queue.dequeue(worker(5)).await?.expect("requeued task");
    assert_eq!(retried.task.attempt, 2);

    sqlx::query("UPDATE check_tasks SET lease_expires_at = NOW() - INTERVAL '1 second'")
        .execute(&pool)
        .await?;
    assert_eq!(queue.scan_expired_leases().await?, 1);
    assert_eq!(queue.depth().await?, QueueDepth { ready: 1, leased: 0 });

    queue.ack(retried.lease_id).await?;
    assert_eq!(queue.depth().await?, QueueDepth { ready: 1, leased: 0 });
    Ok(())
}

#[sqlx::test(migrator = "scanward_core::MIGRATOR")]
#[ignore = "requires Postgres"]
async fn target_directory_reads_the_catalogue(pool: PgPool) -> Result<()> {
    let id = TargetId::new();
    let org = OrganizationId::new();
    sqlx::query("INSERT INTO targets (id, organization_id, address) VALUES ($1, $2, $3)")
        .bind(id.to_uuid())
        .bind(org.to_uuid())
        .bind("intranet.example.com")
        .execute(&pool)
        .await?;

    let directory = PostgresTargetDirectory::new(pool);
    let record = directory.lookup(id).await?.expect("target present");
    assert_eq!(record.organization_id, org);
    assert_eq!(record.address, "intranet.example.com");
    assert!(directory.lookup(TargetId::new()).await?.is_none());
    Ok(())
}

#[sqlx::test(migrator = "scanward_core::MIGRATOR")]
#[ignore = "requires Postgres"]
async fn stale_queued_jobs_and_pending_tasks(pool: PgPool) -> Result<()> {
    let jobs = PostgresScanJobRepository::new(pool.clone());
    let queue = PostgresTaskQueue::new(pool.clone()).await?;
    let org = OrganizationId::new();

    let mut stale = job(org, &["ping"]);
    stale.updated_at -= chrono::Duration::minutes(10);
    jobs.insert(&stale).await?;
    let mut running = job(org, &["ping"]);
    running.status = ScanStatus::Running;
    running.updated_at -= chrono::Duration::minutes(10);
    jobs.insert(&running).await?;
    jobs.insert(&job(org, &["ping"])).await?;

    let cutoff = chrono::Utc::now() - chrono::Duration::minutes(1);
    let found = jobs.list_stale_queued(cutoff, 10).await?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, stale.id);

    assert_eq!(queue.pending_for_job(stale.id).await?, 0);
    queue
        .enqueue_batch(vec![CheckTask::for_job(
            &stale,
            stale.checks[0].clone(),
            Duration::from_secs(20),
        )])
        .await?;
    queue.dequeue(worker(5)).await?.expect("ready task");
    assert_eq!(queue.pending_for_job(stale.id).await?, 1);
    Ok(())
}

#[sqlx::test(migrator = "scanward_core::MIGRATOR")]
#[ignore = "requires Postgres"]
async fn after_cancel_flag_is_set_on_the_stored_row(pool: PgPool) -> Result<()> {
    let jobs = PostgresScanJobRepository::new(pool.clone());
    let results = PostgresResultRepository::new(pool);
    let stored = job(OrganizationId::new(), &["ping"]);
    jobs.insert(&stored).await?;
    let ping = CheckType::new("ping")?;

    assert!(!results.mark_after_cancel(stored.id, &ping).await?);
    results.upsert(draft(&stored, "ping", 0), false).await?;
    assert!(results.mark_after_cancel(stored.id, &ping).await?);
    assert!(!results.mark_after_cancel(stored.id, &ping).await?);
    assert!(results.list(stored.id).await?[0].after_cancel);
    Ok(())
}
