use std::sync::Arc;

use scanward_core::{
    ScanEngine, ScanService,
    orchestration::{InProcScanEventBus, TaskQueue},
};

/// Shared handler state. Cloned per request.
#[derive(Clone, Debug)]
pub struct AppState {
    engine: Arc<ScanEngine>,
}

impl AppState {
    pub fn new(engine: Arc<ScanEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ScanEngine> {
        &self.engine
    }

    pub fn scans(&self) -> &ScanService {
        self.engine.service()
    }

    pub fn events(&self) -> Arc<InProcScanEventBus> {
        self.engine.events()
    }

    pub fn queue(&self) -> Arc<dyn TaskQueue> {
        self.engine.runtime().queue()
    }
}
