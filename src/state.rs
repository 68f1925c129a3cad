use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::modules::jobs::JobStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn JobStore>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn JobStore>) -> Self {
        Self { config, store }
    }
}
