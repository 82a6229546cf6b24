use crate::logging::MetricsCollector;
use crate::pipeline::{CancellationToken, LandmarkStore};
use std::sync::Arc;
use uuid::Uuid;

/// State owned by one registration run.
#[derive(Debug)]
pub struct RunSession {
    pub run_id: Uuid,
    pub marker: String,
    pub store: LandmarkStore,
    pub cancel: CancellationToken,
    pub metrics: Arc<MetricsCollector>,
}

impl RunSession {
    pub fn new(marker: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            marker: marker.into(),
            store: LandmarkStore::new(),
            cancel,
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}
