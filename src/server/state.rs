use std::sync::Arc;
use std::time::Instant;

use crate::config::Settings;
use crate::queue::{QueueRegistry, QueueService};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: QueueService,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(settings: Settings, registry: Arc<QueueRegistry>) -> Self {
        Self {
            settings: Arc::new(settings),
            service: QueueService::new(registry),
            start_time: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        self.service.registry()
    }
}
