// master/src/state.rs

use std::sync::Arc;

use common::JobSupervisor;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: JobSupervisor,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            supervisor: JobSupervisor::new(),
            config: Arc::new(config),
        }
    }
}
