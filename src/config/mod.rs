// Configuration module entry point
// Loads settings from file and environment, and holds per-process state

mod state;
mod types;

use std::net::SocketAddr;

// Re-export public types
pub use state::AppState;
pub use types::{Config, HttpConfig, WarehouseConfig};

use crate::logger::Level;

/// Prefix for environment overrides, e.g. `BQAPI__WAREHOUSE__PROJECT_ID`
const ENV_PREFIX: &str = "BQAPI";

impl Config {
    /// Load configuration from specified file path (extension optional)
    /// Default config file is "config.toml" when no path specified
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("performance.keep_alive_timeout", 75)?
            .set_default("performance.read_timeout", 30)?
            .set_default("performance.shutdown_grace_period", 10)?
            .set_default("http.server_name", "api-bigquery")?
            .set_default("http.enable_cors", true)?
            .set_default("http.cors_allow_origin", "*")?
            .set_default("http.max_body_size", 10_485_760)? // 10MB
            .set_default("warehouse.project_id", "")?
            .set_default(
                "warehouse.endpoint",
                "https://bigquery.googleapis.com/bigquery/v2",
            )?
            .set_default("warehouse.request_timeout", 0)?
            .set_default("warehouse.query_poll_timeout_ms", 10_000)?
            .build()?;

        settings.try_deserialize()
    }

    /// Reject settings that would only fail later, at request time
    pub fn validate(&self) -> Result<(), String> {
        if self.warehouse.project_id.trim().is_empty() {
            return Err(format!(
                "warehouse.project_id is required (set it in the config file or {ENV_PREFIX}__WAREHOUSE__PROJECT_ID)"
            ));
        }
        url::Url::parse(&self.warehouse.endpoint)
            .map_err(|e| format!("Invalid warehouse.endpoint '{}': {e}", self.warehouse.endpoint))?;
        self.logging
            .level
            .parse::<Level>()
            .map_err(|e| format!("Invalid logging.level: {e}"))?;
        Ok(())
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }
}
