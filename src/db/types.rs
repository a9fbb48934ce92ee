//! SQLite row decoding.
//!
//! Rows are decoded positionally into JSON values. The declared column type
//! picks the decoder; expression columns without a declared type fall back to
//! trying text, then integer, then real.

use crate::models::{ROW_ID_COLUMN, TableRow};
use serde_json::Value as JsonValue;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo};

/// Logical category for SQLite column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Unknown,
}

/// Classify a SQLite type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("bool") {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") {
        return TypeCategory::Integer;
    }
    if lower.contains("real") || lower.contains("floa") || lower.contains("doub") {
        return TypeCategory::Float;
    }
    if lower.contains("char") || lower.contains("text") || lower.contains("clob") {
        return TypeCategory::Text;
    }
    TypeCategory::Unknown
}

/// Column names of a row, in select order.
pub fn column_names(row: &SqliteRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode every column of a row into a positional [`TableRow`].
pub fn decode_row(row: &SqliteRow) -> TableRow {
    let mut row_id = None;
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = categorize_type(col.type_info().name());
            let value = decode_column(row, idx, category);
            if col.name() == ROW_ID_COLUMN {
                row_id = value.as_str().map(String::from);
            }
            value
        })
        .collect();
    TableRow { row_id, values }
}

fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
    match category {
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Text => decode_text(row, idx),
        TypeCategory::Unknown => {
            let text = decode_text(row, idx);
            if !text.is_null() {
                return text;
            }
            let int = decode_integer(row, idx);
            if !int.is_null() {
                return int;
            }
            decode_float(row, idx)
        }
    }
}

fn decode_integer(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get::<Option<i64>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::from)
        .unwrap_or(JsonValue::Null)
}

fn decode_boolean(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::Bool)
        .unwrap_or(JsonValue::Null)
}

fn decode_float(row: &SqliteRow, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

fn decode_text(row: &SqliteRow, idx: usize) -> JsonValue {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(JsonValue::String)
        .unwrap_or(JsonValue::Null)
}
