//! Warehouse module
//!
//! The capability interface the router drives, plus the BigQuery REST
//! implementation used in production.

mod bigquery;
mod error;
mod schema;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use bigquery::BigQueryClient;
pub use error::WarehouseError;
pub use schema::TableSchema;

/// One table row: column name to value
pub type Row = Map<String, Value>;

/// Table creation options, sent as the table resource
///
/// Anything besides `schema` and `location` (e.g. `description`,
/// `timePartitioning`, `labels`) is passed through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<TableSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Flags accepted alongside a bulk insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOptions {
    #[serde(default)]
    pub skip_invalid_rows: bool,
    #[serde(default)]
    pub ignore_unknown_values: bool,
}

/// Query job options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_legacy_sql: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Map<String, Value>>,
    /// Extra query settings such as `queryParameters` or `maximumBytesBilled`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Acknowledgement of a bulk insert with no row errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResponse {
    pub kind: String,
}

/// HTTP-level summary of a delete call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub body: String,
    pub status: u16,
    pub message: String,
}

/// Remote tabular-data service
///
/// Each call either yields its success payload or a `WarehouseError`
/// carrying a displayable message.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create a dataset, returning its id
    async fn create_dataset(&self, dataset: &str) -> Result<String, WarehouseError>;

    /// Create a table inside `dataset`, returning its id
    async fn create_table(
        &self,
        dataset: &str,
        table: &str,
        options: TableOptions,
    ) -> Result<String, WarehouseError>;

    async fn insert_rows(
        &self,
        dataset: &str,
        table: &str,
        rows: Vec<Row>,
        options: InsertOptions,
    ) -> Result<InsertResponse, WarehouseError>;

    /// Run a query job to completion and return every result row
    async fn run_query(&self, options: QueryOptions) -> Result<Vec<Row>, WarehouseError>;

    async fn delete_table(&self, dataset: &str, table: &str)
        -> Result<DeleteResponse, WarehouseError>;

    /// Delete a dataset; `force` also drops the tables it contains
    async fn delete_dataset(
        &self,
        dataset: &str,
        force: bool,
    ) -> Result<DeleteResponse, WarehouseError>;
}
