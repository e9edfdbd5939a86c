//! Composition root: builds every orchestration component over one set of
//! backends and hands out the service facade and the runtime.

use std::{fmt, sync::Arc};

#[cfg(feature = "database")]
use sqlx::PgPool;

use crate::{
    checks::CheckRegistry,
    error::Result,
    orchestration::{
        CheckExecutor, Dispatcher, InMemoryResultRepository, InMemoryScanJobRepository,
        InMemoryTargetDirectory, InMemoryTaskQueue, InProcScanEventBus, JobIntake,
        OrchestratorConfig, ResultRepository, ResultStore, ScanEventPublisher, ScanJobRepository,
        QueuedJobSweeper, ScanRuntime, ScanTaskHandler, StatusController, TargetDirectory,
        TaskQueue,
    },
    service::ScanService,
};

/// Queue and storage ports the engine runs on.
#[derive(Clone)]
pub struct ScanBackends {
    pub queue: Arc<dyn TaskQueue>,
    pub jobs: Arc<dyn ScanJobRepository>,
    pub results: Arc<dyn ResultRepository>,
    pub targets: Arc<dyn TargetDirectory>,
}

impl fmt::Debug for ScanBackends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanBackends").finish_non_exhaustive()
    }
}

impl ScanBackends {
    /// Process-local backends; state is lost on restart.
    pub fn in_memory() -> Self {
        Self::in_memory_with_targets(Arc::new(InMemoryTargetDirectory::new()))
    }

    pub fn in_memory_with_targets(targets: Arc<InMemoryTargetDirectory>) -> Self {
        Self {
            queue: Arc::new(InMemoryTaskQueue::new()),
            jobs: Arc::new(InMemoryScanJobRepository::new()),
            results: Arc::new(InMemoryResultRepository::new()),
            targets,
        }
    }

    /// Postgres-backed ports. Migrations must already be applied.
    #[cfg(feature = "database")]
    pub async fn postgres(pool: PgPool) -> Result<Self> {
        use crate::orchestration::{
            PostgresResultRepository, PostgresScanJobRepository, PostgresTargetDirectory,
            PostgresTaskQueue,
        };

        let queue = PostgresTaskQueue::new(pool.clone()).await?;
        Ok(Self {
            queue: Arc::new(queue),
            jobs: Arc::new(PostgresScanJobRepository::new(pool.clone())),
            results: Arc::new(PostgresResultRepository::new(pool.clone())),
            targets: Arc::new(PostgresTargetDirectory::new(pool)),
        })
    }
}

/// Fully wired orchestration engine.
pub struct ScanEngine {
    service: ScanService,
    runtime: ScanRuntime,
    events: Arc<InProcScanEventBus>,
}

impl fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanEngine")
            .field("runtime", &self.runtime)
            .field("events", &self.events)
            .finish()
    }
}

impl ScanEngine {
    pub fn new(config: OrchestratorConfig, registry: CheckRegistry, backends: ScanBackends) -> Self {
        let registry = Arc::new(registry);
        let bus = Arc::new(InProcScanEventBus::new(config.events.channel_capacity));
        let events: Arc<dyn ScanEventPublisher> = bus.clone();

        let status = StatusController::new(
            backends.jobs.clone(),
            backends.results.clone(),
            events.clone(),
            config.status,
        );
        let results = ResultStore::new(backends.jobs.clone(), backends.results.clone(), events.clone());
        let intake = JobIntake::new(
            registry.clone(),
            backends.jobs.clone(),
            backends.targets.clone(),
            events.clone(),
            config.deadlines.clone(),
        );
        let dispatcher = Dispatcher::new(
            backends.queue.clone(),
            status.clone(),
            events.clone(),
            config.deadlines.clone(),
        );
        let handler = ScanTaskHandler::new(
            status.clone(),
            results.clone(),
            CheckExecutor::new(registry.clone(), config.timeouts),
            config.timeouts,
            events,
        );

        let sweeper = QueuedJobSweeper::new(
            backends.jobs.clone(),
            backends.queue.clone(),
            dispatcher.clone(),
            config.recovery,
        );

        let service = ScanService::new(
            registry,
            backends.jobs,
            intake,
            dispatcher,
            status,
            results,
        );
        let runtime =
            ScanRuntime::new(config, backends.queue, Arc::new(handler)).with_sweeper(sweeper);

        Self {
            service,
            runtime,
            events: bus,
        }
    }

    pub fn service(&self) -> &ScanService {
        &self.service
    }

    pub fn runtime(&self) -> &ScanRuntime {
        &self.runtime
    }

    pub fn events(&self) -> Arc<InProcScanEventBus> {
        Arc::clone(&self.events)
    }

    pub async fn start(&self) -> Result<()> {
        self.runtime.start().await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.runtime.shutdown().await
    }
}
