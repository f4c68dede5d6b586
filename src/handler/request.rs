//! Request decoding
//!
//! Turns a method, query string and JSON body into exactly one `Operation`.
//! An explicit `operation` field names the variant; without it the classic
//! field-presence rules pick one, and combinations that could mean two
//! different things are refused.

use hyper::Method;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::warehouse::{InsertOptions, QueryOptions, Row, TableOptions};

/// Validation failures, rendered verbatim into the `{err}` envelope
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Dataset name required.")]
    MissingDataset,

    #[error("Table name required.")]
    MissingTable,

    #[error("BigQuery API requires a POST or DELETE for all endpoints.")]
    UnsupportedMethod,

    #[error("Invalid JSON body: {0}")]
    InvalidBody(String),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Unknown operation '{0}'.")]
    UnknownOperation(String),

    #[error("Operation {operation} requires a {expected} request.")]
    WrongMethod {
        operation: OperationKind,
        expected: &'static str,
    },

    #[error("Ambiguous request: both insert and runQuery are set; name one with the operation field.")]
    Ambiguous,
}

/// Discriminant of `Operation`, as spelled in the `operation` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    CreateDataset,
    CreateTable,
    InsertRows,
    RunQuery,
    DeleteTable,
    DeleteDataset,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateDataset => "createDataset",
            Self::CreateTable => "createTable",
            Self::InsertRows => "insertRows",
            Self::RunQuery => "runQuery",
            Self::DeleteTable => "deleteTable",
            Self::DeleteDataset => "deleteDataset",
        }
    }

    const fn is_delete(self) -> bool {
        matches!(self, Self::DeleteTable | Self::DeleteDataset)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "createDataset" => Ok(Self::CreateDataset),
            "createTable" => Ok(Self::CreateTable),
            "insertRows" => Ok(Self::InsertRows),
            "runQuery" => Ok(Self::RunQuery),
            "deleteTable" => Ok(Self::DeleteTable),
            "deleteDataset" => Ok(Self::DeleteDataset),
            other => Err(RequestError::UnknownOperation(other.to_string())),
        }
    }
}

/// One fully-validated warehouse call
#[derive(Debug, Clone)]
pub enum Operation {
    CreateDataset {
        dataset: String,
    },
    CreateTable {
        dataset: String,
        table: String,
        options: TableOptions,
    },
    InsertRows {
        dataset: String,
        table: String,
        rows: Vec<Row>,
        options: InsertOptions,
    },
    RunQuery {
        options: QueryOptions,
    },
    DeleteTable {
        dataset: String,
        table: String,
    },
    /// Always drops the tables inside as well
    DeleteDataset {
        dataset: String,
    },
}

impl Operation {
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::CreateDataset { .. } => OperationKind::CreateDataset,
            Self::CreateTable { .. } => OperationKind::CreateTable,
            Self::InsertRows { .. } => OperationKind::InsertRows,
            Self::RunQuery { .. } => OperationKind::RunQuery,
            Self::DeleteTable { .. } => OperationKind::DeleteTable,
            Self::DeleteDataset { .. } => OperationKind::DeleteDataset,
        }
    }

    /// Pick the operation for a request
    ///
    /// The dataset check runs before the method check, so a `GET` without a
    /// dataset reports the missing dataset.
    pub fn resolve(method: &Method, fields: &RequestFields) -> Result<Self, RequestError> {
        let dataset = fields.text("dataset").ok_or(RequestError::MissingDataset)?;
        let table = fields.text("tableName");
        let explicit = fields
            .text("operation")
            .map(|name| name.parse::<OperationKind>())
            .transpose()?;

        let kind = match *method {
            Method::POST => match explicit {
                Some(kind) if kind.is_delete() => {
                    return Err(RequestError::WrongMethod {
                        operation: kind,
                        expected: "DELETE",
                    })
                }
                Some(kind) => kind,
                None => infer_post_kind(fields, table.is_some())?,
            },
            Method::DELETE => match explicit {
                Some(kind) if !kind.is_delete() => {
                    return Err(RequestError::WrongMethod {
                        operation: kind,
                        expected: "POST",
                    })
                }
                Some(kind) => kind,
                None if table.is_some() => OperationKind::DeleteTable,
                None => OperationKind::DeleteDataset,
            },
            _ => return Err(RequestError::UnsupportedMethod),
        };

        build(kind, dataset, table, fields)
    }
}

/// Field-presence rules for a `POST` without an explicit operation
fn infer_post_kind(fields: &RequestFields, has_table: bool) -> Result<OperationKind, RequestError> {
    let run_query = fields.truthy("runQuery");
    let insert = fields.truthy("insert");

    Ok(match (run_query, insert) {
        (true, true) => return Err(RequestError::Ambiguous),
        (true, false) => OperationKind::RunQuery,
        (false, true) => OperationKind::InsertRows,
        (false, false) if has_table && fields.nested("create", "options").is_some() => {
            OperationKind::CreateTable
        }
        (false, false) => OperationKind::CreateDataset,
    })
}

fn build(
    kind: OperationKind,
    dataset: String,
    table: Option<String>,
    fields: &RequestFields,
) -> Result<Operation, RequestError> {
    let require_table = || table.clone().ok_or(RequestError::MissingTable);

    Ok(match kind {
        OperationKind::CreateDataset => Operation::CreateDataset { dataset },
        OperationKind::CreateTable => Operation::CreateTable {
            table: require_table()?,
            options: fields
                .nested("create", "options")
                .map(|v| decode_field("create.options", v))
                .transpose()?
                .unwrap_or_default(),
            dataset,
        },
        OperationKind::InsertRows => Operation::InsertRows {
            table: require_table()?,
            rows: fields
                .body
                .get("rows")
                .map(|v| decode_field("rows", v))
                .transpose()?
                .unwrap_or_default(),
            options: match fields.body.get("insert") {
                Some(v @ Value::Object(_)) => decode_field("insert", v)?,
                _ => InsertOptions::default(),
            },
            dataset,
        },
        OperationKind::RunQuery => {
            let options = fields.nested("runQuery", "options").ok_or_else(|| {
                RequestError::InvalidField {
                    field: "runQuery.options",
                    reason: "a query is required".to_string(),
                }
            })?;
            Operation::RunQuery {
                options: decode_field("runQuery.options", options)?,
            }
        }
        OperationKind::DeleteTable => Operation::DeleteTable {
            table: require_table()?,
            dataset,
        },
        OperationKind::DeleteDataset => Operation::DeleteDataset { dataset },
    })
}

fn decode_field<T: DeserializeOwned>(field: &'static str, value: &Value) -> Result<T, RequestError> {
    T::deserialize(value).map_err(|e| RequestError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

/// Named request fields from the JSON body and the query string
#[derive(Debug, Default)]
pub struct RequestFields {
    body: Map<String, Value>,
    query: HashMap<String, String>,
}

impl RequestFields {
    /// Decode an (optionally empty) JSON object body and a raw query string
    pub fn parse(body: &[u8], query: Option<&str>) -> Result<Self, RequestError> {
        let body = if body.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(RequestError::InvalidBody(
                        "expected a JSON object".to_string(),
                    ))
                }
                Err(e) => return Err(RequestError::InvalidBody(e.to_string())),
            }
        };

        let query = query
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Ok(Self { body, query })
    }

    /// Non-empty string field, body first, then query string
    fn text(&self, key: &str) -> Option<String> {
        let from_body = match self.body.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        from_body
            .filter(|s| !s.is_empty())
            .or_else(|| self.query.get(key).filter(|s| !s.is_empty()).cloned())
    }

    fn truthy(&self, key: &str) -> bool {
        self.body.get(key).is_some_and(is_truthy)
            || self.query.get(key).is_some_and(|v| !v.is_empty())
    }

    fn nested(&self, outer: &str, inner: &str) -> Option<&Value> {
        self.body
            .get(outer)
            .and_then(|v| v.get(inner))
            .filter(|v| is_truthy(v))
    }
}

/// Loose truthiness: null, false, 0 and "" count as absent
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
