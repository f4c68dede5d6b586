//! Table schemas and result row decoding
//!
//! Schemas arrive in three shapes: the shorthand string
//! `"Name:string, Age:integer"`, a bare array of field objects, or the
//! REST form `{"fields": [...]}`. Query results come back in the
//! `{"f": [{"v": ...}]}` wire form and are turned into plain objects here.

use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;

use super::Row;

/// Ordered list of table fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
}

/// Single column definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sub-fields of a RECORD column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldSchema>>,
}

impl FieldSchema {
    pub fn new(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_uppercase(),
            mode: None,
            description: None,
            fields: None,
        }
    }

    fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|m| m.eq_ignore_ascii_case("REPEATED"))
    }
}

impl FromStr for TableSchema {
    type Err = String;

    /// Parse `"Name:string, Age:integer"`; a field without a type is STRING
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split(',')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (name, field_type) = pair.split_once(':').unwrap_or((pair, ""));
                let (name, field_type) = (name.trim(), field_type.trim());
                if name.is_empty() {
                    return Err(format!("Schema field '{pair}' has no name"));
                }
                let field_type = if field_type.is_empty() {
                    "STRING"
                } else {
                    field_type
                };
                Ok(FieldSchema::new(name, field_type))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if fields.is_empty() {
            return Err("Schema must declare at least one field".to_string());
        }
        Ok(Self { fields })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SchemaRepr {
    Shorthand(String),
    Fields(Vec<FieldSchema>),
    Object { fields: Vec<FieldSchema> },
}

impl<'de> Deserialize<'de> for TableSchema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match SchemaRepr::deserialize(deserializer)? {
            SchemaRepr::Shorthand(text) => text.parse().map_err(serde::de::Error::custom),
            SchemaRepr::Fields(fields) | SchemaRepr::Object { fields } => Ok(Self { fields }),
        }
    }
}

/// Result row in wire form
#[derive(Debug, Deserialize)]
pub struct WireRow {
    #[serde(default)]
    pub f: Vec<WireCell>,
}

#[derive(Debug, Deserialize)]
pub struct WireCell {
    #[serde(default)]
    pub v: Value,
}

/// Convert wire rows into objects keyed by column name
pub fn decode_rows(schema: &TableSchema, rows: Vec<WireRow>) -> Vec<Row> {
    rows.into_iter()
        .map(|row| decode_row(&schema.fields, row.f.into_iter().map(|cell| cell.v)))
        .collect()
}

fn decode_row(fields: &[FieldSchema], cells: impl Iterator<Item = Value>) -> Row {
    fields
        .iter()
        .zip(cells)
        .map(|(field, value)| (field.name.clone(), decode_value(field, value)))
        .collect()
}

fn decode_value(field: &FieldSchema, value: Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Array(items) if field.is_repeated() => Value::Array(
            items
                .into_iter()
                .map(|item| decode_scalar(field, unwrap_cell(item)))
                .collect(),
        ),
        other => decode_scalar(field, other),
    }
}

/// Repeated values and record members are wrapped as `{"v": ...}`
fn unwrap_cell(item: Value) -> Value {
    match item {
        Value::Object(mut cell) if cell.contains_key("v") => {
            cell.remove("v").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode_scalar(field: &FieldSchema, value: Value) -> Value {
    match field.field_type.as_str() {
        "RECORD" | "STRUCT" => decode_record(field, value),
        kind => match value {
            Value::String(text) => decode_text(kind, text),
            other => other,
        },
    }
}

fn decode_record(field: &FieldSchema, value: Value) -> Value {
    match value {
        Value::Object(mut record) => match record.remove("f") {
            Some(Value::Array(cells)) => {
                let nested = field.fields.as_deref().unwrap_or_default();
                Value::Object(decode_row(nested, cells.into_iter().map(unwrap_cell)))
            }
            Some(other) => {
                record.insert("f".to_string(), other);
                Value::Object(record)
            }
            None => Value::Object(record),
        },
        other => other,
    }
}

fn decode_text(kind: &str, text: String) -> Value {
    match kind {
        "INTEGER" | "INT64" => text.parse::<i64>().map_or(Value::String(text), Value::from),
        "FLOAT" | "FLOAT64" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or(Value::String(text), Value::Number),
        "BOOLEAN" | "BOOL" => match text.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text),
        },
        "TIMESTAMP" => format_timestamp(&text).map_or(Value::String(text), Value::String),
        "JSON" => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

/// Timestamps are sent as (possibly exponent-form) seconds since the epoch
#[allow(clippy::cast_possible_truncation)]
fn format_timestamp(text: &str) -> Option<String> {
    let seconds = text.parse::<f64>().ok().filter(|s| s.is_finite())?;
    let micros = (seconds * 1_000_000.0).round() as i64;
    DateTime::from_timestamp_micros(micros)
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
