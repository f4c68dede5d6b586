//! BigQuery REST v2 client
//!
//! Implements the warehouse capabilities with plain JSON calls against
//! `{endpoint}/projects/{project}/...`. The endpoint is configurable so the
//! same client talks to the public API or a local emulator.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use url::Url;
use uuid::Uuid;

use super::schema::{decode_rows, TableSchema, WireRow};
use super::{
    DeleteResponse, InsertOptions, InsertResponse, QueryOptions, Row, TableOptions, Warehouse,
    WarehouseError,
};
use crate::config::WarehouseConfig;
use crate::logger;

const INSERT_ALL_REQUEST: &str = "bigquery#tableDataInsertAllRequest";
const INSERT_ALL_RESPONSE: &str = "bigquery#tableDataInsertAllResponse";

pub struct BigQueryClient {
    http: reqwest::Client,
    base: Url,
    project_id: String,
    access_token: Option<String>,
    default_location: Option<String>,
    poll_timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetReference {
    project_id: String,
    dataset_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetResource {
    dataset_reference: DatasetReference,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableResource {
    table_reference: TableReference,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResource {
    job_reference: JobReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultsPage {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    insert_errors: Vec<RowErrors>,
}

#[derive(Debug, Deserialize)]
struct RowErrors {
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl BigQueryClient {
    pub fn new(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let base = Url::parse(&config.endpoint)
            .map_err(|e| WarehouseError::Endpoint(format!("{}: {e}", config.endpoint)))?;
        if base.cannot_be_a_base() {
            return Err(WarehouseError::Endpoint(config.endpoint.clone()));
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
        if config.request_timeout > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout));
        }

        Ok(Self {
            http: builder.build()?,
            base,
            project_id: config.project_id.clone(),
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            default_location: config.default_location.clone(),
            poll_timeout_ms: config.query_poll_timeout_ms,
        })
    }

    /// `{endpoint}/projects/{project}/{segments...}`, each segment escaped
    fn project_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push("projects")
                .push(&self.project_id)
                .extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.access_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, WarehouseError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::from_response(status, &body));
        }
        Ok(response.json().await?)
    }

    async fn send_delete(builder: RequestBuilder) -> Result<DeleteResponse, WarehouseError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(WarehouseError::from_response(status, &body));
        }
        Ok(DeleteResponse {
            body,
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }

    /// Poll `getQueryResults` until the job completes, then drain every page
    async fn collect_results(&self, job: &JobReference) -> Result<Vec<Row>, WarehouseError> {
        let mut rows = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.project_url(&["queries", &job.job_id]);
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("timeoutMs", &self.poll_timeout_ms.to_string());
                if let Some(location) = &job.location {
                    query.append_pair("location", location);
                }
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page: QueryResultsPage = Self::send_json(self.request(Method::GET, url)).await?;
            if !page.job_complete {
                logger::log_debug(&format!("Job {} still running", job.job_id));
                continue;
            }

            let schema = page.schema.unwrap_or_default();
            rows.extend(decode_rows(&schema, page.rows));

            match page.page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl Warehouse for BigQueryClient {
    async fn create_dataset(&self, dataset: &str) -> Result<String, WarehouseError> {
        let reference = DatasetReference {
            project_id: self.project_id.clone(),
            dataset_id: dataset.to_string(),
        };
        let mut body = json!({ "datasetReference": reference });
        if let (Some(location), Some(resource)) = (&self.default_location, body.as_object_mut()) {
            resource.insert("location".to_string(), Value::String(location.clone()));
        }

        let created: DatasetResource =
            Self::send_json(self.request(Method::POST, self.project_url(&["datasets"])).json(&body))
                .await?;
        Ok(created.dataset_reference.dataset_id)
    }

    async fn create_table(
        &self,
        dataset: &str,
        table: &str,
        options: TableOptions,
    ) -> Result<String, WarehouseError> {
        let mut resource = match serde_json::to_value(&options) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                return Err(WarehouseError::InvalidRequest(format!(
                    "Invalid table options: {e}"
                )))
            }
        };
        let reference = TableReference {
            project_id: self.project_id.clone(),
            dataset_id: dataset.to_string(),
            table_id: table.to_string(),
        };
        resource.insert("tableReference".to_string(), json!(reference));

        let url = self.project_url(&["datasets", dataset, "tables"]);
        let created: TableResource =
            Self::send_json(self.request(Method::POST, url).json(&resource)).await?;
        Ok(created.table_reference.table_id)
    }

    async fn insert_rows(
        &self,
        dataset: &str,
        table: &str,
        rows: Vec<Row>,
        options: InsertOptions,
    ) -> Result<InsertResponse, WarehouseError> {
        if rows.is_empty() {
            return Err(WarehouseError::InvalidRequest(
                "You must provide at least 1 row to be inserted.".to_string(),
            ));
        }

        let total = rows.len();
        let rows: Vec<Value> = rows
            .into_iter()
            .map(|row| json!({ "insertId": Uuid::new_v4().to_string(), "json": row }))
            .collect();
        let body = json!({
            "kind": INSERT_ALL_REQUEST,
            "skipInvalidRows": options.skip_invalid_rows,
            "ignoreUnknownValues": options.ignore_unknown_values,
            "rows": rows,
        });

        let url = self.project_url(&["datasets", dataset, "tables", table, "insertAll"]);
        let response: InsertAllResponse =
            Self::send_json(self.request(Method::POST, url).json(&body)).await?;

        if let Some(first) = response.insert_errors.first() {
            let reason = first
                .errors
                .iter()
                .map(|e| if e.message.is_empty() { &e.reason } else { &e.message })
                .find(|m| !m.is_empty())
                .cloned()
                .unwrap_or_else(|| "row rejected".to_string());
            return Err(WarehouseError::PartialInsert {
                failed: response.insert_errors.len(),
                total,
                reason,
            });
        }

        let kind = if response.kind.is_empty() {
            INSERT_ALL_RESPONSE.to_string()
        } else {
            response.kind
        };
        Ok(InsertResponse { kind })
    }

    async fn run_query(&self, options: QueryOptions) -> Result<Vec<Row>, WarehouseError> {
        let QueryOptions {
            query,
            location,
            use_legacy_sql,
            dry_run,
            labels,
            extra,
        } = options;

        let mut query_config = extra;
        query_config.insert("query".to_string(), Value::String(query));
        query_config.insert(
            "useLegacySql".to_string(),
            Value::Bool(use_legacy_sql.unwrap_or(false)),
        );

        let mut configuration = Map::new();
        configuration.insert("query".to_string(), Value::Object(query_config));
        if let Some(dry_run) = dry_run {
            configuration.insert("dryRun".to_string(), Value::Bool(dry_run));
        }
        if let Some(labels) = labels {
            configuration.insert("labels".to_string(), Value::Object(labels));
        }

        let reference = JobReference {
            project_id: self.project_id.clone(),
            job_id: format!("job_{}", Uuid::new_v4().simple()),
            location: location.or_else(|| self.default_location.clone()),
        };
        let body = json!({ "jobReference": reference, "configuration": configuration });

        let job: JobResource =
            Self::send_json(self.request(Method::POST, self.project_url(&["jobs"])).json(&body))
                .await?;
        logger::log_debug(&format!("Job {} started.", job.job_reference.job_id));

        if dry_run == Some(true) {
            return Ok(Vec::new());
        }

        let rows = self.collect_results(&job.job_reference).await?;
        logger::log_debug(&format!("query results length {}", rows.len()));
        Ok(rows)
    }

    async fn delete_table(
        &self,
        dataset: &str,
        table: &str,
    ) -> Result<DeleteResponse, WarehouseError> {
        let url = self.project_url(&["datasets", dataset, "tables", table]);
        Self::send_delete(self.request(Method::DELETE, url)).await
    }

    async fn delete_dataset(
        &self,
        dataset: &str,
        force: bool,
    ) -> Result<DeleteResponse, WarehouseError> {
        let mut url = self.project_url(&["datasets", dataset]);
        if force {
            url.query_pairs_mut().append_pair("deleteContents", "true");
        }
        Self::send_delete(self.request(Method::DELETE, url)).await
    }
}
