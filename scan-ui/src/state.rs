//! Shared application state for the scan server.

use std::path::PathBuf;
use std::sync::Arc;

use scan::coordinator::{CoordinatorSettings, RunCoordinator};
use scan::core::catalog::Catalog;
use scan::events::FanoutSink;
use scan::executor::Executor;
use scan::io::report::ReportSink;

use crate::hub::ObserverHub;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: RunCoordinator,
    /// Live event feed for `/events` subscribers.
    pub hub: Arc<ObserverHub>,
}

impl AppState {
    /// Wire the coordinator to the observer hub and, when `reports_dir` is
    /// set, a report sink.
    pub fn new(
        catalog: Catalog,
        executor: Arc<dyn Executor>,
        settings: CoordinatorSettings,
        reports_dir: Option<PathBuf>,
    ) -> Self {
        let hub = Arc::new(ObserverHub::default());
        let mut sink = FanoutSink::new().with(hub.clone());
        if let Some(dir) = reports_dir {
            sink = sink.with(Arc::new(ReportSink::in_dir(dir)));
        }
        let coordinator = RunCoordinator::new(catalog, executor, Arc::new(sink), settings);
        Self { coordinator, hub }
    }
}
