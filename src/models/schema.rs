//! Schema-related data models.
//!
//! This module defines the column definitions of a user table, the key-value
//! store entries that describe it, and the positional result set returned by
//! queries.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Row identifier column shared by every user table.
pub const ROW_ID_COLUMN: &str = "_id";
pub const SAVEPOINT_TYPE_COLUMN: &str = "_savepoint_type";
pub const SAVEPOINT_TIMESTAMP_COLUMN: &str = "_savepoint_timestamp";
pub const SAVEPOINT_CREATOR_COLUMN: &str = "_savepoint_creator";
pub const SYNC_STATE_COLUMN: &str = "_sync_state";
pub const CONFLICT_TYPE_COLUMN: &str = "_conflict_type";

/// Admin columns present on every user table, sorted by name.
///
/// Everything is text except `_conflict_type`, which is an integer.
pub const ADMIN_COLUMNS: &[&str] = &[
    CONFLICT_TYPE_COLUMN,
    ROW_ID_COLUMN,
    SAVEPOINT_CREATOR_COLUMN,
    SAVEPOINT_TIMESTAMP_COLUMN,
    SAVEPOINT_TYPE_COLUMN,
    SYNC_STATE_COLUMN,
];

/// Savepoint type of a finalized row version.
pub const SAVEPOINT_COMPLETE: &str = "COMPLETE";
/// Savepoint type of a row version saved while still being edited.
pub const SAVEPOINT_INCOMPLETE: &str = "INCOMPLETE";

/// Check whether a column name is one of the admin columns.
pub fn is_admin_column(name: &str) -> bool {
    ADMIN_COLUMNS.contains(&name)
}

/// Logical data type of a user column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementDataType {
    Integer,
    Number,
    #[serde(rename = "boolean")]
    Bool,
    String,
    Array,
    Object,
}

impl ElementDataType {
    /// SQLite storage type for this element type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Bool => "BOOLEAN",
            Self::Number => "REAL",
            Self::String | Self::Array | Self::Object => "TEXT",
        }
    }

    /// Map a declared SQLite column type back to an element type.
    pub fn from_sql_type(declared: &str) -> Self {
        let lower = declared.to_lowercase();
        if lower.contains("bool") {
            Self::Bool
        } else if lower.contains("int") {
            Self::Integer
        } else if lower.contains("real") || lower.contains("double") || lower.contains("float") {
            Self::Number
        } else {
            Self::String
        }
    }

    /// Parse the type name stored in the key-value store.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" | "bool" => Some(Self::Bool),
            "string" => Some(Self::String),
            "array" => Some(Self::Array),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub element_key: String,
    pub element_type: ElementDataType,
}

impl ColumnDefinition {
    pub fn new(element_key: impl Into<String>, element_type: ElementDataType) -> Self {
        Self {
            element_key: element_key.into(),
            element_type,
        }
    }
}

/// The ordered user-defined columns of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedColumns {
    table_id: String,
    columns: Vec<ColumnDefinition>,
}

impl OrderedColumns {
    pub fn new(table_id: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            table_id: table_id.into(),
            columns,
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Find a column definition by element key.
    pub fn find(&self, element_key: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.element_key == element_key)
    }

    pub fn contains(&self, element_key: &str) -> bool {
        self.find(element_key).is_some()
    }

    pub fn element_keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.element_key.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Nested schema description handed to the UI as `metadata.orderedColumns`.
    pub fn data_model(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .map(|c| {
                (
                    c.element_key.clone(),
                    serde_json::json!({
                        "elementKey": c.element_key,
                        "elementName": c.element_key,
                        "elementType": c.element_type,
                    }),
                )
            })
            .collect()
    }
}

/// One entry of a table's key-value store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueStoreEntry {
    pub partition: String,
    pub aspect: String,
    pub key: String,
    /// Element type name, e.g. "integer" or "boolean"
    #[serde(rename = "type")]
    pub value_type: String,
    pub value: Option<String>,
}

impl KeyValueStoreEntry {
    /// Resolve the stored string into the matching JSON scalar.
    ///
    /// Integers, numbers and booleans become JSON numbers/booleans; arrays,
    /// objects and unknown types are passed through as strings.
    pub fn typed_value(&self) -> JsonValue {
        let Some(raw) = self.value.as_deref() else {
            return JsonValue::Null;
        };
        let resolved = match ElementDataType::parse(&self.value_type) {
            Some(ElementDataType::Integer) => raw.parse::<i64>().ok().map(JsonValue::from),
            Some(ElementDataType::Number) => raw
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number),
            Some(ElementDataType::Bool) => raw.parse::<i64>().ok().map(|v| JsonValue::Bool(v != 0)),
            _ => None,
        };
        resolved.unwrap_or_else(|| JsonValue::String(raw.to_string()))
    }

    /// Entry as it appears in `metadata.keyValueStoreList`.
    pub fn to_metadata(&self) -> JsonValue {
        serde_json::json!({
            "partition": self.partition,
            "aspect": self.aspect,
            "key": self.key,
            "type": self.value_type,
            "value": self.typed_value(),
        })
    }
}

/// One row of a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Value of `_id`, when the result set carries it
    pub row_id: Option<String>,
    pub values: Vec<JsonValue>,
}

/// Positional result set of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserTable {
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl UserTable {
    pub fn new(columns: Vec<String>, rows: Vec<TableRow>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column key to column index.
    pub fn element_key_map(&self) -> BTreeMap<String, usize> {
        self.columns
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect()
    }

    /// Row id to row index. Later versions of a checkpointed row win.
    pub fn row_id_map(&self) -> BTreeMap<String, usize> {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(idx, row)| row.row_id.clone().map(|id| (id, idx)))
            .collect()
    }

    /// Consume the table into the `data` array of an envelope.
    pub fn into_data(self) -> Vec<Vec<JsonValue>> {
        self.rows.into_iter().map(|r| r.values).collect()
    }
}
