//! Query-related data models.
//!
//! This module defines bind parameters, the shape of a user-table query, and the
//! typed column values a mutation is converted into before it reaches the
//! database service.

use crate::error::{BrokerError, BrokerResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// Sort direction for `orderByDirection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    /// Parse the loosely typed direction string the UI sends ("asc", "DESC", ...).
    pub fn parse(value: &str) -> BrokerResult<Self> {
        if value.eq_ignore_ascii_case("asc") {
            Ok(Self::Asc)
        } else if value.eq_ignore_ascii_case("desc") {
            Ok(Self::Desc)
        } else {
            Err(BrokerError::invalid_input(format!(
                "orderByDirection must be ASC or DESC, got '{}'",
                value
            )))
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Query shape for a user-table query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableQuery {
    pub where_clause: Option<String>,
    pub bind_params: Vec<QueryParam>,
    pub group_by: Vec<String>,
    pub having: Option<String>,
    pub order_by_key: Option<String>,
    pub order_by_direction: Option<OrderDirection>,
    /// Attach the table's key-value store entries to the response metadata.
    pub include_schema_map: bool,
}

impl TableQuery {
    /// Create a query for all rows of a table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the where clause and its bind parameters.
    pub fn with_where(mut self, clause: impl Into<String>, params: Vec<QueryParam>) -> Self {
        self.where_clause = Some(clause.into());
        self.bind_params = params;
        self
    }

    /// Set the grouping columns and having clause.
    pub fn with_group_by(mut self, columns: Vec<String>, having: Option<String>) -> Self {
        self.group_by = columns;
        self.having = having;
        self
    }

    /// Set the ordering column and direction.
    pub fn with_order_by(mut self, key: impl Into<String>, direction: OrderDirection) -> Self {
        self.order_by_key = Some(key.into());
        self.order_by_direction = Some(direction);
        self
    }

    pub fn with_schema_map(mut self) -> Self {
        self.include_schema_map = true;
        self
    }
}

/// A typed column value of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Bool(bool),
}

impl ColumnValue {
    /// Convert a stored JSON value back into a column value.
    ///
    /// Used when copying an existing row version; nested values are kept in
    /// their string form.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Real(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// Column-to-value map of an add/update operation, ordered by column name.
pub type MutationValues = BTreeMap<String, ColumnValue>;
