//! Application state for the status surface

use crate::pipeline::ContentPipeline;
use crate::types::Stage;
use std::sync::Arc;

/// Shared state accessible to all route handlers
///
/// One status server runs per stage; the stage field selects which worker
/// the control endpoints act on. Cloned per request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The assembled pipeline
    pub pipeline: Arc<ContentPipeline>,

    /// The stage this server fronts
    pub stage: Stage,
}

impl AppState {
    /// Create a new AppState
    pub fn new(pipeline: Arc<ContentPipeline>, stage: Stage) -> Self {
        Self { pipeline, stage }
    }

    /// Service name reported by this stage's endpoints
    pub fn service_name(&self) -> &'static str {
        match self.stage {
            Stage::Discovery => "discovery",
            Stage::Download => "download",
            Stage::Parse => "text-extraction",
            Stage::Storage => "storage",
        }
    }
}
