//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: pre-flight, body limits,
//! operation resolution and the single warehouse call behind each request.

use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode, Version};
use serde::Serialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use super::request::{Operation, OperationKind, RequestError, RequestFields};
use crate::config::AppState;
use crate::http;
use crate::logger::{self, AccessLogEntry};
use crate::warehouse::{Warehouse, WarehouseError};

/// Anything that turns into an `{err}` envelope
#[derive(Debug, Error)]
enum RouteError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error("Failed to encode warehouse response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RouteError {
    const fn remote_status(&self) -> Option<StatusCode> {
        match self {
            Self::Warehouse(e) => e.status(),
            _ => None,
        }
    }
}

/// Status and JSON envelope of a routed request; no body means pre-flight
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: StatusCode,
    pub body: Option<Value>,
    pub operation: Option<OperationKind>,
}

impl Outcome {
    const fn preflight() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: None,
            operation: None,
        }
    }

    fn success(operation: OperationKind, data: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(json!({ "data": data })),
            operation: Some(operation),
        }
    }

    fn failure(operation: Option<OperationKind>, err: &RouteError) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: Some(json!({ "err": err.to_string() })),
            operation,
        }
    }
}

/// Main entry point for HTTP request handling
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let mut entry = access_entry(&req, peer_addr);
    let http_config = &state.config.http;
    let server_name = http_config.server_name.as_str();

    let response = if req.method() == Method::OPTIONS {
        http::build_options_response(&state.cors, server_name)
    } else if exceeds_body_limit(&req, http_config.max_body_size) {
        http::build_413_response(&state.cors, server_name)
    } else {
        let (parts, body) = req.into_parts();
        let limit = usize::try_from(http_config.max_body_size).unwrap_or(usize::MAX);
        match Limited::new(body, limit).collect().await {
            Ok(collected) => {
                let body = collected.to_bytes();
                let outcome = route(
                    &parts.method,
                    parts.uri.query(),
                    &body,
                    state.warehouse.as_ref(),
                )
                .await;
                entry.operation = outcome.operation.map(|op| op.to_string());
                outcome_response(&outcome, &state)
            }
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                logger::log_warning(&format!(
                    "Request body exceeded {} bytes",
                    http_config.max_body_size
                ));
                http::build_413_response(&state.cors, server_name)
            }
            Err(e) => {
                let err = RouteError::from(RequestError::InvalidBody(e.to_string()));
                outcome_response(&Outcome::failure(None, &err), &state)
            }
        }
    };

    if state.config.logging.access_log {
        entry.status = response.status().as_u16();
        entry.body_bytes = response
            .body()
            .size_hint()
            .exact()
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(0);
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    Ok(response)
}

/// Resolve a request into one warehouse call and run it
pub async fn route(
    method: &Method,
    query: Option<&str>,
    body: &[u8],
    warehouse: &dyn Warehouse,
) -> Outcome {
    if method == Method::OPTIONS {
        return Outcome::preflight();
    }

    let operation =
        match RequestFields::parse(body, query).and_then(|f| Operation::resolve(method, &f)) {
            Ok(operation) => operation,
            Err(e) => {
                logger::log_warning(&format!("Rejected {method} request: {e}"));
                return Outcome::failure(None, &e.into());
            }
        };

    let kind = operation.kind();
    match execute(operation, warehouse).await {
        Ok(data) => Outcome::success(kind, data),
        Err(e) => {
            match e.remote_status() {
                Some(status) => logger::log_error(&format!("{kind} failed ({status}): {e}")),
                None => logger::log_error(&format!("{kind} failed: {e}")),
            }
            Outcome::failure(Some(kind), &e)
        }
    }
}

async fn execute(operation: Operation, warehouse: &dyn Warehouse) -> Result<Value, RouteError> {
    match operation {
        Operation::CreateDataset { dataset } => {
            logger::log_debug("create dataset");
            let id = warehouse.create_dataset(&dataset).await?;
            logger::log_debug(&format!("Dataset {id} created."));
            Ok(Value::String(id))
        }
        Operation::CreateTable {
            dataset,
            table,
            options,
        } => {
            logger::log_debug("create table");
            let id = warehouse.create_table(&dataset, &table, options).await?;
            logger::log_debug(&format!("Table {id} created."));
            Ok(Value::String(id))
        }
        Operation::InsertRows {
            dataset,
            table,
            rows,
            options,
        } => {
            logger::log_debug("insert rows");
            let count = rows.len();
            let response = warehouse
                .insert_rows(&dataset, &table, rows, options)
                .await?;
            logger::log_debug(&format!("Inserted {count} rows"));
            to_data(&[response])
        }
        Operation::RunQuery { options } => {
            logger::log_debug("run query");
            let rows = warehouse.run_query(options).await?;
            Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
        }
        Operation::DeleteTable { dataset, table } => {
            logger::log_debug("delete table");
            let response = warehouse.delete_table(&dataset, &table).await?;
            logger::log_debug(&format!("Table {table} deleted."));
            to_data(&response)
        }
        Operation::DeleteDataset { dataset } => {
            logger::log_debug("delete dataset");
            let response = warehouse.delete_dataset(&dataset, true).await?;
            logger::log_debug(&format!("Dataset {dataset} deleted."));
            to_data(&response)
        }
    }
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, RouteError> {
    Ok(serde_json::to_value(value)?)
}

fn outcome_response(outcome: &Outcome, state: &AppState) -> Response<Full<Bytes>> {
    let server_name = state.config.http.server_name.as_str();
    match outcome.body {
        Some(ref body) => http::build_json_response(outcome.status, body, &state.cors, server_name),
        None => http::build_options_response(&state.cors, server_name),
    }
}

/// Validate Content-Length header ahead of reading the body
fn exceeds_body_limit<B>(req: &Request<B>, max_body_size: u64) -> bool {
    let Some(content_length) = req.headers().get("content-length") else {
        return false;
    };
    match content_length.to_str().map(str::parse::<u64>) {
        Ok(Ok(size)) if size > max_body_size => {
            logger::log_warning(&format!(
                "Request body too large: {size} bytes (max: {max_body_size})"
            ));
            true
        }
        Ok(Ok(_)) => false,
        _ => {
            logger::log_warning("Invalid Content-Length header, relying on streamed limit");
            false
        }
    }
}

fn access_entry<B>(req: &Request<B>, peer_addr: SocketAddr) -> AccessLogEntry {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };

    let mut entry = AccessLogEntry::new(
        peer_addr.ip().to_string(),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.query = req.uri().query().map(ToString::to_string);
    entry.http_version = match req.version() {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    }
    .to_string();
    entry.referer = header("referer");
    entry.user_agent = header("user-agent");
    entry
}
