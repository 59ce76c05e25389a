use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::workers::status::WorkerStatus;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub status: Arc<WorkerStatus>,
}

impl AppState {
    pub fn new(config: AppConfig, status: Arc<WorkerStatus>) -> Self {
        Self { config, status }
    }
}
