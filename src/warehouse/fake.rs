//! In-memory warehouse for router tests
//!
//! Keeps datasets and tables in a map and records every capability call so
//! tests can assert that validation failures never reach the service.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{
    DeleteResponse, InsertOptions, InsertResponse, QueryOptions, Row, TableOptions, Warehouse,
    WarehouseError,
};

#[derive(Default)]
struct Tables {
    tables: BTreeMap<String, Vec<Row>>,
}

#[derive(Default)]
pub struct FakeWarehouse {
    datasets: Mutex<BTreeMap<String, Tables>>,
    calls: Mutex<Vec<String>>,
    query_result: Mutex<Vec<Row>>,
    last_query: Mutex<Option<QueryOptions>>,
    query_delay: Option<Duration>,
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by every subsequent `run_query`
    pub fn with_query_result(self, rows: Vec<Row>) -> Self {
        *self.query_result.lock().unwrap() = rows;
        self
    }

    /// Make every `run_query` take at least `delay`
    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_query(&self) -> Option<QueryOptions> {
        self.last_query.lock().unwrap().clone()
    }

    pub fn has_dataset(&self, dataset: &str) -> bool {
        self.datasets.lock().unwrap().contains_key(dataset)
    }

    pub fn table_rows(&self, dataset: &str, table: &str) -> Option<Vec<Row>> {
        self.datasets
            .lock()
            .unwrap()
            .get(dataset)
            .and_then(|d| d.tables.get(table))
            .cloned()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn not_found(what: &str) -> WarehouseError {
        WarehouseError::Api {
            status: StatusCode::NOT_FOUND,
            message: format!("Not found: {what}"),
        }
    }

    fn no_content() -> DeleteResponse {
        DeleteResponse {
            body: String::new(),
            status: 204,
            message: "No Content".to_string(),
        }
    }
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn create_dataset(&self, dataset: &str) -> Result<String, WarehouseError> {
        self.record("create_dataset");
        let mut datasets = self.datasets.lock().unwrap();
        if datasets.contains_key(dataset) {
            return Err(WarehouseError::Api {
                status: StatusCode::CONFLICT,
                message: format!("Already Exists: Dataset {dataset}"),
            });
        }
        datasets.insert(dataset.to_string(), Tables::default());
        Ok(dataset.to_string())
    }

    async fn create_table(
        &self,
        dataset: &str,
        table: &str,
        _options: TableOptions,
    ) -> Result<String, WarehouseError> {
        self.record("create_table");
        let mut datasets = self.datasets.lock().unwrap();
        let entry = datasets
            .get_mut(dataset)
            .ok_or_else(|| Self::not_found(&format!("Dataset {dataset}")))?;
        entry.tables.insert(table.to_string(), Vec::new());
        Ok(table.to_string())
    }

    async fn insert_rows(
        &self,
        dataset: &str,
        table: &str,
        rows: Vec<Row>,
        _options: InsertOptions,
    ) -> Result<InsertResponse, WarehouseError> {
        self.record("insert_rows");
        let mut datasets = self.datasets.lock().unwrap();
        let stored = datasets
            .get_mut(dataset)
            .and_then(|d| d.tables.get_mut(table))
            .ok_or_else(|| Self::not_found(&format!("Table {dataset}.{table}")))?;
        stored.extend(rows);
        Ok(InsertResponse {
            kind: "bigquery#tableDataInsertAllResponse".to_string(),
        })
    }

    async fn run_query(&self, options: QueryOptions) -> Result<Vec<Row>, WarehouseError> {
        self.record("run_query");
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        if options.query.trim().is_empty() {
            return Err(WarehouseError::Api {
                status: StatusCode::BAD_REQUEST,
                message: "Syntax error: Unexpected end of script".to_string(),
            });
        }
        let mut rows = self.query_result.lock().unwrap().clone();
        if let Some(limit) = limit_of(&options.query) {
            rows.truncate(limit);
        }
        *self.last_query.lock().unwrap() = Some(options);
        Ok(rows)
    }

    async fn delete_table(
        &self,
        dataset: &str,
        table: &str,
    ) -> Result<DeleteResponse, WarehouseError> {
        self.record("delete_table");
        let mut datasets = self.datasets.lock().unwrap();
        datasets
            .get_mut(dataset)
            .and_then(|d| d.tables.remove(table))
            .ok_or_else(|| Self::not_found(&format!("Table {dataset}.{table}")))?;
        Ok(Self::no_content())
    }

    async fn delete_dataset(
        &self,
        dataset: &str,
        force: bool,
    ) -> Result<DeleteResponse, WarehouseError> {
        self.record("delete_dataset");
        let mut datasets = self.datasets.lock().unwrap();
        let entry = datasets
            .get(dataset)
            .ok_or_else(|| Self::not_found(&format!("Dataset {dataset}")))?;
        if !force && !entry.tables.is_empty() {
            return Err(WarehouseError::Api {
                status: StatusCode::BAD_REQUEST,
                message: format!("Dataset {dataset} is still in use"),
            });
        }
        datasets.remove(dataset);
        Ok(Self::no_content())
    }
}

/// Trailing `LIMIT n` of a query, if any
fn limit_of(query: &str) -> Option<usize> {
    let mut words = query.trim_end().trim_end_matches(';').split_whitespace().rev();
    let n = words.next()?.parse().ok()?;
    words
        .next()
        .filter(|w| w.eq_ignore_ascii_case("limit"))
        .map(|_| n)
}

#[cfg(test)]
mod tests {
    use super::limit_of;

    #[test]
    fn test_limit_of() {
        assert_eq!(limit_of("SELECT * FROM t LIMIT 80"), Some(80));
        assert_eq!(limit_of("SELECT * FROM t limit 80;"), Some(80));
        assert_eq!(limit_of("SELECT * FROM t LIMIT 80 ; \n"), Some(80));
        assert_eq!(limit_of("SELECT 80"), None);
        assert_eq!(limit_of("SELECT * FROM t"), None);
    }
}
