// Configuration types module
// Defines all configuration-related data structures

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
    pub http: HttpConfig,
    pub warehouse: WarehouseConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Minimum level written: error, warn, info or debug
    pub level: String,
    pub access_log: bool,
    /// Access log format (combined, common, json, or custom pattern)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
    /// Access log file path (optional, stdout if not set)
    #[serde(default)]
    pub access_log_file: Option<String>,
    /// Error log file path (optional, stderr if not set)
    #[serde(default)]
    pub error_log_file: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Performance configuration
#[derive(Debug, Deserialize, Clone)]
pub struct PerformanceConfig {
    /// Seconds an idle keep-alive connection stays open, 0 disables keep-alive
    pub keep_alive_timeout: u64,
    /// Seconds a client may take to send request headers, 0 disables the limit
    pub read_timeout: u64,
    pub max_connections: Option<u64>,
    /// Seconds to wait for in-flight connections on shutdown
    pub shutdown_grace_period: u64,
}

/// HTTP configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub server_name: String,
    pub enable_cors: bool,
    pub cors_allow_origin: String,
    pub max_body_size: u64,
}

/// Remote warehouse connection
#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    pub project_id: String,
    /// Base URL of the REST API, e.g. `https://bigquery.googleapis.com/bigquery/v2`
    pub endpoint: String,
    /// Bearer token sent with every call
    #[serde(default)]
    pub access_token: Option<String>,
    /// Location applied to new datasets and to queries without one
    #[serde(default)]
    pub default_location: Option<String>,
    /// Client timeout per call in seconds, 0 disables it
    pub request_timeout: u64,
    /// Long-poll window for each `getQueryResults` call
    pub query_poll_timeout_ms: u64,
}
