use crate::handles::JsonFileRecords;
use crate::orchestrator::SessionOrchestrator;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator bound to the single live session
    pub orchestrator: Arc<SessionOrchestrator>,

    /// Conversation records (the same store the handle store writes to)
    pub records: Arc<JsonFileRecords>,
}

impl AppState {
    pub fn new(orchestrator: Arc<SessionOrchestrator>, records: Arc<JsonFileRecords>) -> Self {
        Self {
            orchestrator,
            records,
        }
    }
}
