// Application state module
// Shared, read-only state handed to every connection

use std::sync::Arc;

use super::types::Config;
use crate::http::CorsPolicy;
use crate::warehouse::Warehouse;

/// Application state
pub struct AppState {
    pub config: Config,
    /// Remote warehouse every operation is delegated to
    pub warehouse: Arc<dyn Warehouse>,
    pub cors: CorsPolicy,
}

impl AppState {
    pub fn new(config: &Config, warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            config: config.clone(),
            warehouse,
            cors: CorsPolicy::from_config(&config.http),
        }
    }
}
