//! Warehouse error types
//!
//! Every variant renders to the plain message that ends up in the `{err}`
//! envelope, so callers never need to inspect the cause.

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The service answered with a non-success status
    #[error("{message}")]
    Api { status: StatusCode, message: String },

    /// Some rows of a bulk insert were refused
    #[error("Failed to insert {failed} of {total} rows: {reason}")]
    PartialInsert {
        failed: usize,
        total: usize,
        reason: String,
    },

    /// The call was rejected locally before reaching the service
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Warehouse request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid warehouse endpoint: {0}")]
    Endpoint(String),
}

/// BigQuery error document: `{"error": {"code": 404, "message": "..."}}`
#[derive(Debug, Deserialize)]
struct ErrorDocument {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl WarehouseError {
    /// Build an API error from a failed response body
    ///
    /// Uses `error.message` when the body is a BigQuery error document and
    /// falls back to the status line plus raw body otherwise.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorDocument>(body)
            .ok()
            .map(|doc| doc.error.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                let reason = status.canonical_reason().unwrap_or("Unknown Status");
                let body = body.trim();
                if body.is_empty() {
                    format!("{} {reason}", status.as_u16())
                } else {
                    format!("{} {reason}: {body}", status.as_u16())
                }
            });

        Self::Api { status, message }
    }

    /// HTTP status the service answered with, if it answered at all
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
