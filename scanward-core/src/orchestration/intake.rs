use std::{collections::HashSet, fmt, sync::Arc};

use scanward_model::{
    CheckType, Principal, ResolvedTarget, ScanConfig, ScanJob, ScanTarget, SubmitScanRequest,
};
use url::Url;

use crate::{
    checks::CheckRegistry,
    error::{IntakeError, Result},
};

use super::{
    config::DeadlineConfig,
    events::{ScanEvent, ScanEventPayload, ScanEventPublisher},
    store::{ScanJobRepository, TargetDirectory},
};

/// Parse a raw URL or bare host into a scan address.
///
/// Bare hosts are given an `https://` scheme; only http(s) URLs with a host
/// are accepted.
pub fn normalize_url(raw: &str) -> std::result::Result<ResolvedTarget, IntakeError> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| IntakeError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let parsed = Url::parse(&candidate).map_err(|err| invalid(&err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("missing host"))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    Ok(ResolvedTarget {
        url: parsed.to_string(),
        host,
    })
}

/// Validates scan requests and persists them as `queued` jobs.
#[derive(Clone)]
pub struct JobIntake {
    registry: Arc<CheckRegistry>,
    jobs: Arc<dyn ScanJobRepository>,
    targets: Arc<dyn TargetDirectory>,
    events: Arc<dyn ScanEventPublisher>,
    deadlines: DeadlineConfig,
}

impl fmt::Debug for JobIntake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobIntake")
            .field("registry", &self.registry)
            .field("max_timeout_secs", &self.deadlines.max_secs)
            .finish()
    }
}

impl JobIntake {
    pub fn new(
        registry: Arc<CheckRegistry>,
        jobs: Arc<dyn ScanJobRepository>,
        targets: Arc<dyn TargetDirectory>,
        events: Arc<dyn ScanEventPublisher>,
        deadlines: DeadlineConfig,
    ) -> Self {
        Self {
            registry,
            jobs,
            targets,
            events,
            deadlines,
        }
    }

    /// Validate `request`, persist the job in `queued` with progress 0 and
    /// return it. Nothing is written when validation fails.
    pub async fn submit(&self, principal: Principal, request: SubmitScanRequest) -> Result<ScanJob> {
        let target = Self::target_of(&request)?;
        let checks = self.validate_checks(&request.checks)?;
        self.validate_config(&request.config)?;
        let resolved = self.resolve(&principal, &target).await?;

        let job = ScanJob::queued(
            target,
            resolved,
            principal.organization_id,
            principal.user_id,
            checks,
            request.config,
        );
        self.jobs.insert(&job).await?;

        tracing::info!(
            target: "scan::intake",
            job_id = %job.id,
            organization = %job.organization_id,
            host = %job.resolved.host,
            checks = job.checks.len(),
            "scan submitted"
        );
        let event = ScanEvent::new(
            job.id,
            ScanEventPayload::Submitted {
                organization_id: job.organization_id,
                checks: job.checks.clone(),
            },
        );
        if let Err(err) = self.events.publish(event).await {
            tracing::warn!(target: "scan::intake", job_id = %job.id, "event publish failed: {err}");
        }
        Ok(job)
    }

    fn target_of(request: &SubmitScanRequest) -> std::result::Result<ScanTarget, IntakeError> {
        let url = request
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty());
        match (request.target_id, url) {
            (Some(_), Some(_)) => Err(IntakeError::AmbiguousTarget),
            (Some(target_id), None) => Ok(ScanTarget::Saved { target_id }),
            (None, Some(url)) => Ok(ScanTarget::Url {
                url: url.to_string(),
            }),
            (None, None) => Err(IntakeError::MissingTarget),
        }
    }

    /// Registered, de-duplicated check names in request order.
    fn validate_checks(&self, raw: &[String]) -> std::result::Result<Vec<CheckType>, IntakeError> {
        if raw.iter().all(|name| name.trim().is_empty()) {
            return Err(IntakeError::NoChecksSelected);
        }

        let mut seen = HashSet::new();
        let mut checks = Vec::with_capacity(raw.len());
        for name in raw.iter().filter(|name| !name.trim().is_empty()) {
            let check = CheckType::new(name.as_str())
                .map_err(|_| IntakeError::InvalidConfig(format!("unsupported check: {name}")))?;
            if !self.registry.contains(&check) {
                return Err(IntakeError::InvalidConfig(format!("unsupported check: {check}")));
            }
            if seen.insert(check.clone()) {
                checks.push(check);
            }
        }
        Ok(checks)
    }

    fn validate_config(&self, config: &ScanConfig) -> std::result::Result<(), IntakeError> {
        if let Some(timeout) = config.timeout_secs
            && (timeout == 0 || timeout > self.deadlines.max_secs)
        {
            return Err(IntakeError::InvalidConfig(format!(
                "timeout_secs must be between 1 and {}",
                self.deadlines.max_secs
            )));
        }
        if config
            .custom_wordlist
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            return Err(IntakeError::InvalidConfig(
                "custom_wordlist must not be empty".into(),
            ));
        }
        Ok(())
    }

    async fn resolve(&self, principal: &Principal, target: &ScanTarget) -> Result<ResolvedTarget> {
        match target {
            ScanTarget::Url { url } => Ok(normalize_url(url)?),
            ScanTarget::Saved { target_id } => {
                let record = self
                    .targets
                    .lookup(*target_id)
                    .await?
                    .filter(|record| record.organization_id == principal.organization_id)
                    .ok_or_else(|| IntakeError::UnknownTarget(target_id.to_string()))?;
                Ok(normalize_url(&record.address)?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        checks::BuiltinChecksConfig,
        error::ScanError,
        orchestration::{
            events::NoopEventPublisher,
            memory::{InMemoryScanJobRepository, InMemoryTargetDirectory},
            store::TargetRecord,
        },
    };
    use scanward_model::{OrganizationId, ScanStatus, TargetId, UserId};

    struct Fixture {
        intake: JobIntake,
        jobs: Arc<InMemoryScanJobRepository>,
        targets: Arc<InMemoryTargetDirectory>,
        principal: Principal,
    }

    fn fixture() -> Fixture {
        let jobs = Arc::new(InMemoryScanJobRepository::new());
        let targets = Arc::new(InMemoryTargetDirectory::new());
        let intake = JobIntake::new(
            Arc::new(CheckRegistry::with_builtins(&BuiltinChecksConfig::default()).unwrap()),
            jobs.clone(),
            targets.clone(),
            Arc::new(NoopEventPublisher),
            DeadlineConfig::default(),
        );
        Fixture {
            intake,
            jobs,
            targets,
            principal: Principal {
                organization_id: OrganizationId::new(),
                user_id: UserId::new(),
            },
        }
    }

    fn url_request(url: &str, checks: &[&str]) -> SubmitScanRequest {
        SubmitScanRequest {
            url: Some(url.into()),
            checks: checks.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn org_jobs(f: &Fixture) -> usize {
        f.jobs
            .list_by_organization(f.principal.organization_id, 100, 0)
            .await
            .unwrap()
            .len()
    }

    #[test]
    fn normalizes_bare_hosts_and_rejects_other_schemes() {
        let target = normalize_url("example.com").unwrap();
        assert_eq!(target.url, "https://example.com/");
        assert_eq!(target.host, "example.com");

        let v6 = normalize_url("http://[::1]:8080/x").unwrap();
        assert_eq!(v6.host, "::1");

        assert!(matches!(
            normalize_url("ftp://example.com"),
            Err(IntakeError::InvalidUrl { .. })
        ));
        assert!(normalize_url("https://").is_err());
        assert!(normalize_url("   ").is_err());
    }

    #[tokio::test]
    async fn queued_job_with_deduplicated_checks() {
        let f = fixture();
        let job = f
            .intake
            .submit(
                f.principal,
                url_request("example.com", &["ping", "headers", "ping", "ssl"]),
            )
            .await
            .unwrap();

        assert_eq!(job.status, ScanStatus::Queued);
        assert_eq!(job.progress, 0);
        let names: Vec<&str> = job.checks.iter().map(CheckType::as_str).collect();
        assert_eq!(names, vec!["ping", "headers", "ssl"]);
        assert!(f.jobs.get(job.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rejections_persist_nothing() {
        let f = fixture();
        let cases = vec![
            (url_request("example.com", &[]), "no checks"),
            (url_request("example.com", &["ping", "teleport"]), "unsupported"),
            (url_request("ftp://example.com", &["ping"]), "bad url"),
            (
                SubmitScanRequest {
                    checks: vec!["ping".into()],
                    ..Default::default()
                },
                "missing target",
            ),
            (
                SubmitScanRequest {
                    target_id: Some(TargetId::new()),
                    url: Some("example.com".into()),
                    checks: vec!["ping".into()],
                    ..Default::default()
                },
                "ambiguous target",
            ),
            (
                SubmitScanRequest {
                    url: Some("example.com".into()),
                    checks: vec!["ping".into()],
                    config: ScanConfig {
                        timeout_secs: Some(0),
                        ..Default::default()
                    },
                    ..Default::default()
                },
                "zero timeout",
            ),
        ];

        for (request, label) in cases {
            let err = f.intake.submit(f.principal, request).await.unwrap_err();
            assert!(matches!(err, ScanError::Intake(_)), "{label}: {err}");
        }
        assert_eq!(org_jobs(&f).await, 0);
    }

    #[tokio::test]
    async fn empty_check_list_is_no_checks_selected() {
        let f = fixture();
        let err = f
            .intake
            .submit(f.principal, url_request("example.com", &[" "]))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Intake(IntakeError::NoChecksSelected)));
    }

    #[tokio::test]
    async fn saved_targets_must_belong_to_the_caller() {
        let f = fixture();
        let own = TargetRecord {
            id: TargetId::new(),
            organization_id: f.principal.organization_id,
            address: "internal.example.com".into(),
        };
        let foreign = TargetRecord {
            id: TargetId::new(),
            organization_id: OrganizationId::new(),
            address: "other.example.com".into(),
        };
        f.targets.insert(own.clone()).await;
        f.targets.insert(foreign.clone()).await;

        let saved = |id| SubmitScanRequest {
            target_id: Some(id),
            checks: vec!["dns".into()],
            ..Default::default()
        };

        let job = f.intake.submit(f.principal, saved(own.id)).await.unwrap();
        assert_eq!(job.target.target_id(), Some(own.id));
        assert_eq!(job.resolved.host, "internal.example.com");

        for id in [foreign.id, TargetId::new()] {
            let err = f.intake.submit(f.principal, saved(id)).await.unwrap_err();
            assert!(matches!(err, ScanError::Intake(IntakeError::UnknownTarget(_))));
        }
        assert_eq!(org_jobs(&f).await, 1);
    }
}
