//! Parameter binding utilities for database queries.
//!
//! This module provides functions to bind `QueryParam` and `ColumnValue` values
//! to SQLite query objects. Values are bound owned so a query never borrows
//! from the request that produced it.

use crate::models::{ColumnValue, QueryParam};
use sqlx::Sqlite;
use sqlx::sqlite::SqliteArguments;

pub(crate) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(query: SqliteQuery<'q>, param: &QueryParam) -> SqliteQuery<'q> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.clone()),
    }
}

/// Bind a mutation value to a SQLite query.
pub(crate) fn bind_column_value<'q>(
    query: SqliteQuery<'q>,
    value: &ColumnValue,
) -> SqliteQuery<'q> {
    match value {
        ColumnValue::Null => query.bind(None::<String>),
        ColumnValue::Bool(v) => query.bind(*v),
        ColumnValue::Integer(v) => query.bind(*v),
        ColumnValue::Real(v) => query.bind(*v),
        ColumnValue::Text(v) => query.bind(v.clone()),
    }
}

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("visits"), "\"visits\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
