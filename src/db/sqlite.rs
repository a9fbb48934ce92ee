//! SQLite implementation of the database service.
//!
//! Each handle owns one pooled connection with an open transaction. User
//! tables carry the admin columns from [`ADMIN_COLUMNS`]; several versions of a
//! row (checkpoints) may share one `_id`, and the newest version is the one
//! with the latest `_savepoint_timestamp` (ties broken by `rowid`).

use crate::db::params::{SqliteQuery, bind_column_value, bind_sqlite_param, quote_ident};
use crate::db::service::DatabaseService;
use crate::db::types::{column_names, decode_row};
use crate::error::{BrokerError, BrokerResult};
use crate::models::schema::{
    CONFLICT_TYPE_COLUMN, ROW_ID_COLUMN, SAVEPOINT_COMPLETE, SAVEPOINT_CREATOR_COLUMN,
    SAVEPOINT_INCOMPLETE, SAVEPOINT_TIMESTAMP_COLUMN, SAVEPOINT_TYPE_COLUMN, SYNC_STATE_COLUMN,
    is_admin_column,
};
use crate::models::{
    ADMIN_COLUMNS, ColumnDefinition, ColumnValue, ElementDataType, KeyValueStoreEntry,
    MutationValues, OrderedColumns, QueryParam, TableQuery, UserTable,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Key-value store table describing user tables.
pub const KEY_VALUE_STORE_TABLE: &str = "_key_value_store_active";

/// Creator recorded on row versions written through the broker.
const SAVEPOINT_CREATOR: &str = "anonymous";

/// Order that puts the newest version of a row first.
const NEWEST_FIRST: &str = "\"_savepoint_timestamp\" DESC, rowid DESC";

/// Pool settings for [`SqliteDatabaseService::connect`].
#[derive(Debug, Clone)]
pub struct SqliteServiceOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub busy_timeout: Duration,
}

impl Default for SqliteServiceOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// One open connection and its transaction.
#[derive(Clone)]
pub struct SqliteHandle {
    id: u64,
    tx: Arc<Mutex<Option<Transaction<'static, Sqlite>>>>,
}

impl SqliteHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Debug for SqliteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteHandle").field("id", &self.id).finish()
    }
}

/// Borrow the live transaction of a handle, or fail if it was closed.
macro_rules! live_tx {
    ($guard:ident, $handle:expr) => {{
        match $guard.as_mut() {
            Some(tx) => tx,
            None => {
                return Err(BrokerError::transaction(
                    "Connection is already closed",
                    format!("handle-{}", $handle.id),
                ));
            }
        }
    }};
}

#[derive(Debug)]
pub struct SqliteDatabaseService {
    pool: SqlitePool,
    next_handle: AtomicU64,
}

impl SqliteDatabaseService {
    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            next_handle: AtomicU64::new(1),
        }
    }

    /// Connect to a SQLite database URL, creating the file if missing.
    pub async fn connect(url: &str, options: &SqliteServiceOptions) -> BrokerResult<Self> {
        let connect_options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(options.busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect_with(connect_options)
            .await?;

        info!(
            max_connections = options.max_connections,
            "Connected to SQLite database"
        );
        Ok(Self::from_pool(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create a user table with the admin columns plus `columns`.
    pub async fn create_user_table(
        &self,
        table_id: &str,
        columns: &[ColumnDefinition],
    ) -> BrokerResult<()> {
        validate_table_id(table_id)?;
        let mut defs = vec![
            format!("{} TEXT NOT NULL", quote_ident(ROW_ID_COLUMN)),
            format!("{} INTEGER NULL", quote_ident(CONFLICT_TYPE_COLUMN)),
            format!("{} TEXT NULL", quote_ident(SAVEPOINT_CREATOR_COLUMN)),
            format!("{} TEXT NOT NULL", quote_ident(SAVEPOINT_TIMESTAMP_COLUMN)),
            format!("{} TEXT NULL", quote_ident(SAVEPOINT_TYPE_COLUMN)),
            format!("{} TEXT NULL", quote_ident(SYNC_STATE_COLUMN)),
        ];
        for col in columns {
            if is_admin_column(&col.element_key) {
                return Err(BrokerError::schema(
                    "Column name collides with an admin column",
                    col.element_key.clone(),
                ));
            }
            defs.push(format!(
                "{} {} NULL",
                quote_ident(&col.element_key),
                col.element_type.sql_type()
            ));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table_id),
            defs.join(", ")
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        info!(table_id = %table_id, columns = columns.len(), "User table created");
        Ok(())
    }

    /// Insert or replace one key-value store entry for a table.
    pub async fn put_table_metadata(
        &self,
        table_id: &str,
        entry: &KeyValueStoreEntry,
    ) -> BrokerResult<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             \"_table_id\" TEXT NOT NULL, \"_partition\" TEXT NOT NULL, \
             \"_aspect\" TEXT NOT NULL, \"_key\" TEXT NOT NULL, \
             \"_type\" TEXT NOT NULL, \"_value\" TEXT NULL, \
             PRIMARY KEY (\"_table_id\", \"_partition\", \"_aspect\", \"_key\"))",
            quote_ident(KEY_VALUE_STORE_TABLE)
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "INSERT OR REPLACE INTO {} \
             (\"_table_id\", \"_partition\", \"_aspect\", \"_key\", \"_type\", \"_value\") \
             VALUES (?, ?, ?, ?, ?, ?)",
            quote_ident(KEY_VALUE_STORE_TABLE)
        ))
        .bind(table_id.to_string())
        .bind(entry.partition.clone())
        .bind(entry.aspect.clone())
        .bind(entry.key.clone())
        .bind(entry.value_type.clone())
        .bind(entry.value.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseService for SqliteDatabaseService {
    type Handle = SqliteHandle;

    async fn open(&self, app_name: &str) -> BrokerResult<SqliteHandle> {
        let tx = self.pool.begin().await?;
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        debug!(app_name = %app_name, handle = id, "Connection opened");
        Ok(SqliteHandle {
            id,
            tx: Arc::new(Mutex::new(Some(tx))),
        })
    }

    async fn close_transaction(
        &self,
        app_name: &str,
        handle: &SqliteHandle,
        commit: bool,
    ) -> BrokerResult<()> {
        let tx = handle.tx.lock().await.take().ok_or_else(|| {
            BrokerError::transaction(
                "Connection is already closed",
                format!("handle-{}", handle.id),
            )
        })?;
        if commit {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        debug!(app_name = %app_name, handle = handle.id, commit, "Connection closed");
        Ok(())
    }

    async fn get_user_defined_columns(
        &self,
        _app_name: &str,
        table_id: &str,
    ) -> BrokerResult<OrderedColumns> {
        validate_table_id(table_id)?;
        let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
            .bind(table_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        if rows.is_empty() {
            return Err(BrokerError::schema("Table does not exist", table_id));
        }

        let mut columns = Vec::new();
        for row in rows {
            let name: String = row.try_get("name")?;
            let declared: String = row.try_get("type")?;
            if !is_admin_column(&name) {
                columns.push(ColumnDefinition::new(
                    name,
                    ElementDataType::from_sql_type(&declared),
                ));
            }
        }
        Ok(OrderedColumns::new(table_id, columns))
    }

    async fn query(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
        columns: &OrderedColumns,
        query: &TableQuery,
    ) -> BrokerResult<UserTable> {
        let select: Vec<String> = ADMIN_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(columns.element_keys().map(String::from))
            .collect();
        let sql = build_select(table_id, &select, columns, query)?;

        let mut q = sqlx::query(&sql);
        for param in &query.bind_params {
            q = bind_sqlite_param(q, param);
        }

        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);
        let rows = q.fetch_all(&mut **tx).await?;

        debug!(table_id = %table_id, sql = %sql, row_count = rows.len(), "Queried user table");
        Ok(UserTable::new(select, rows.iter().map(decode_row).collect()))
    }

    async fn raw_query(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        sql: &str,
        bind_params: &[QueryParam],
    ) -> BrokerResult<UserTable> {
        let mut q = sqlx::query(sql);
        for param in bind_params {
            q = bind_sqlite_param(q, param);
        }

        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);
        let rows: Vec<SqliteRow> = q.fetch(&mut **tx).try_collect().await?;

        let columns = rows.first().map(column_names).unwrap_or_default();
        debug!(sql = %sql, row_count = rows.len(), "Raw query executed");
        Ok(UserTable::new(columns, rows.iter().map(decode_row).collect()))
    }

    async fn insert_row(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
        columns: &OrderedColumns,
        values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()> {
        check_columns(columns, values)?;

        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);

        let existing: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {} WHERE \"_id\" = ?",
            quote_ident(table_id)
        ))
        .bind(row_id.to_string())
        .fetch_one(&mut **tx)
        .await?;
        if existing > 0 {
            return Err(BrokerError::database(
                format!("Row '{}' already exists in {}", row_id, table_id),
                None,
                "Use updateRow to change an existing row",
            ));
        }

        let q = insert_version(table_id, row_id, Some(SAVEPOINT_COMPLETE), "new_row", values);
        q.sql_query().execute(&mut **tx).await?;
        debug!(table_id = %table_id, row_id = %row_id, "Row inserted");
        Ok(())
    }

    async fn update_row(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
        columns: &OrderedColumns,
        values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()> {
        check_columns(columns, values)?;

        let mut assignments: Vec<String> = values
            .keys()
            .map(|k| format!("{} = ?", quote_ident(k)))
            .collect();
        assignments.push("\"_savepoint_type\" = ?".to_string());
        assignments.push("\"_savepoint_timestamp\" = ?".to_string());
        assignments.push(
            "\"_sync_state\" = CASE WHEN \"_sync_state\" = 'synced' THEN 'changed' ELSE \"_sync_state\" END"
                .to_string(),
        );
        let sql = format!(
            "UPDATE {} SET {} WHERE \"_id\" = ?",
            quote_ident(table_id),
            assignments.join(", ")
        );

        let mut q = sqlx::query(&sql);
        for value in values.values() {
            q = bind_column_value(q, value);
        }
        q = q.bind(SAVEPOINT_COMPLETE).bind(now_timestamp()).bind(row_id.to_string());

        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);
        let result = q.execute(&mut **tx).await?;
        if result.rows_affected() == 0 {
            return Err(BrokerError::database(
                format!("Row '{}' not found in {}", row_id, table_id),
                None,
                "Use addRow to create the row first",
            ));
        }
        debug!(table_id = %table_id, row_id = %row_id, "Row updated");
        Ok(())
    }

    async fn delete_row(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()> {
        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE \"_id\" = ?",
            quote_ident(table_id)
        ))
        .bind(row_id.to_string())
        .execute(&mut **tx)
        .await?;
        debug!(
            table_id = %table_id,
            row_id = %row_id,
            versions = result.rows_affected(),
            "Row deleted"
        );
        Ok(())
    }

    async fn add_checkpoint(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
        columns: &OrderedColumns,
        values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()> {
        check_columns(columns, values)?;

        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);

        let select: Vec<String> = std::iter::once(quote_ident(SYNC_STATE_COLUMN))
            .chain(columns.element_keys().map(quote_ident))
            .collect();
        let newest = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE \"_id\" = ? ORDER BY {} LIMIT 1",
            select.join(", "),
            quote_ident(table_id),
            NEWEST_FIRST
        ))
        .bind(row_id.to_string())
        .fetch_optional(&mut **tx)
        .await?;

        // Start from the newest version and overlay the payload.
        let mut merged = MutationValues::new();
        let mut sync_state = "new_row".to_string();
        if let Some(row) = newest {
            let decoded = decode_row(&row);
            let mut fields = decoded.values.into_iter();
            if let Some(state) = fields.next().and_then(|v| v.as_str().map(String::from)) {
                sync_state = state;
            }
            for (key, value) in columns.element_keys().zip(fields) {
                merged.insert(key.to_string(), ColumnValue::from_json(&value));
            }
        }
        for (key, value) in values {
            merged.insert(key.clone(), value.clone());
        }

        let q = insert_version(table_id, row_id, None, &sync_state, &merged);
        q.sql_query().execute(&mut **tx).await?;
        debug!(table_id = %table_id, row_id = %row_id, "Checkpoint added");
        Ok(())
    }

    async fn save_checkpoint_as_incomplete(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()> {
        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);
        finalize_newest(tx, table_id, row_id, SAVEPOINT_INCOMPLETE).await
    }

    async fn save_checkpoint_as_complete(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()> {
        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);
        finalize_newest(tx, table_id, row_id, SAVEPOINT_COMPLETE).await
    }

    async fn delete_checkpoints(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
        row_id: &str,
        delete_all: bool,
    ) -> BrokerResult<()> {
        let table = quote_ident(table_id);
        let sql = if delete_all {
            format!(
                "DELETE FROM {} WHERE \"_id\" = ? AND \"_savepoint_type\" IS NULL",
                table
            )
        } else {
            format!(
                "DELETE FROM {table} WHERE rowid = (SELECT rowid FROM {table} \
                 WHERE \"_id\" = ? AND \"_savepoint_type\" IS NULL ORDER BY {order} LIMIT 1)",
                table = table,
                order = NEWEST_FIRST
            )
        };

        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);
        let result = sqlx::query(&sql)
            .bind(row_id.to_string())
            .execute(&mut **tx)
            .await?;
        debug!(
            table_id = %table_id,
            row_id = %row_id,
            delete_all,
            deleted = result.rows_affected(),
            "Checkpoints deleted"
        );
        Ok(())
    }

    async fn get_table_metadata(
        &self,
        _app_name: &str,
        handle: &SqliteHandle,
        table_id: &str,
    ) -> BrokerResult<Vec<KeyValueStoreEntry>> {
        let mut guard = handle.tx.lock().await;
        let tx = live_tx!(guard, handle);

        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(KEY_VALUE_STORE_TABLE)
        .fetch_one(&mut **tx)
        .await?;
        if present == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT \"_partition\", \"_aspect\", \"_key\", \"_type\", \"_value\" FROM {} \
             WHERE \"_table_id\" = ? ORDER BY \"_partition\", \"_aspect\", \"_key\"",
            quote_ident(KEY_VALUE_STORE_TABLE)
        ))
        .bind(table_id.to_string())
        .fetch_all(&mut **tx)
        .await?;

        rows.iter()
            .map(|row| -> BrokerResult<KeyValueStoreEntry> {
                Ok(KeyValueStoreEntry {
                    partition: row.try_get("_partition")?,
                    aspect: row.try_get("_aspect")?,
                    key: row.try_get("_key")?,
                    value_type: row.try_get("_type")?,
                    value: row.try_get("_value")?,
                })
            })
            .collect()
    }
}

/// Owned SQL text plus bind values for a row-version insert.
struct InsertVersion {
    sql: String,
    binds: Vec<ColumnValue>,
}

impl InsertVersion {
    fn sql_query(&self) -> SqliteQuery<'_> {
        let mut q = sqlx::query(&self.sql);
        for value in &self.binds {
            q = bind_column_value(q, value);
        }
        q
    }
}

fn insert_version(
    table_id: &str,
    row_id: &str,
    savepoint_type: Option<&str>,
    sync_state: &str,
    values: &MutationValues,
) -> InsertVersion {
    let mut names = vec![
        quote_ident(ROW_ID_COLUMN),
        quote_ident(SAVEPOINT_TYPE_COLUMN),
        quote_ident(SAVEPOINT_TIMESTAMP_COLUMN),
        quote_ident(SAVEPOINT_CREATOR_COLUMN),
        quote_ident(SYNC_STATE_COLUMN),
    ];
    let mut binds = vec![
        ColumnValue::Text(row_id.to_string()),
        savepoint_type
            .map(|t| ColumnValue::Text(t.to_string()))
            .unwrap_or(ColumnValue::Null),
        ColumnValue::Text(now_timestamp()),
        ColumnValue::Text(SAVEPOINT_CREATOR.to_string()),
        ColumnValue::Text(sync_state.to_string()),
    ];
    for (key, value) in values {
        names.push(quote_ident(key));
        binds.push(value.clone());
    }
    let placeholders = vec!["?"; names.len()].join(", ");
    InsertVersion {
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table_id),
            names.join(", "),
            placeholders
        ),
        binds,
    }
}

/// Keep only the newest version of a row and stamp it with `savepoint_type`.
async fn finalize_newest(
    tx: &mut Transaction<'static, Sqlite>,
    table_id: &str,
    row_id: &str,
    savepoint_type: &str,
) -> BrokerResult<()> {
    let table = quote_ident(table_id);
    let newest: Option<i64> = sqlx::query_scalar(&format!(
        "SELECT rowid FROM {} WHERE \"_id\" = ? ORDER BY {} LIMIT 1",
        table, NEWEST_FIRST
    ))
    .bind(row_id.to_string())
    .fetch_optional(&mut **tx)
    .await?;
    let Some(newest) = newest else {
        return Err(BrokerError::database(
            format!("Row '{}' not found in {}", row_id, table_id),
            None,
            "Add a checkpoint before saving it",
        ));
    };

    sqlx::query(&format!(
        "DELETE FROM {} WHERE \"_id\" = ? AND rowid <> ?",
        table
    ))
    .bind(row_id.to_string())
    .bind(newest)
    .execute(&mut **tx)
    .await?;

    sqlx::query(&format!(
        "UPDATE {} SET \"_savepoint_type\" = ?, \"_savepoint_timestamp\" = ? WHERE rowid = ?",
        table
    ))
    .bind(savepoint_type.to_string())
    .bind(now_timestamp())
    .bind(newest)
    .execute(&mut **tx)
    .await?;

    debug!(
        table_id = %table_id,
        row_id = %row_id,
        savepoint_type = %savepoint_type,
        "Checkpoint saved"
    );
    Ok(())
}

fn build_select(
    table_id: &str,
    select: &[String],
    columns: &OrderedColumns,
    query: &TableQuery,
) -> BrokerResult<String> {
    let known = |name: &str| is_admin_column(name) || columns.contains(name);

    let mut sql = format!(
        "SELECT {} FROM {}",
        select
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", "),
        quote_ident(table_id)
    );
    if let Some(clause) = query.where_clause.as_deref().filter(|w| !w.trim().is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(clause);
    }
    if !query.group_by.is_empty() {
        if let Some(bad) = query.group_by.iter().find(|g| !known(g.as_str())) {
            return Err(BrokerError::schema("Unknown groupBy column", bad.clone()));
        }
        let groups: Vec<String> = query.group_by.iter().map(|g| quote_ident(g)).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&groups.join(", "));
        if let Some(having) = query.having.as_deref().filter(|h| !h.trim().is_empty()) {
            sql.push_str(" HAVING ");
            sql.push_str(having);
        }
    }
    if let Some(key) = query.order_by_key.as_deref() {
        if !known(key) {
            return Err(BrokerError::schema("Unknown orderBy column", key));
        }
        let direction = query.order_by_direction.unwrap_or_default();
        sql.push_str(&format!(" ORDER BY {} {}", quote_ident(key), direction.as_sql()));
    }
    Ok(sql)
}

fn check_columns(columns: &OrderedColumns, values: &MutationValues) -> BrokerResult<()> {
    match values.keys().find(|k| !columns.contains(k)) {
        Some(unknown) => Err(BrokerError::schema(
            format!("Unknown column in {}", columns.table_id()),
            unknown.clone(),
        )),
        None => Ok(()),
    }
}

fn validate_table_id(table_id: &str) -> BrokerResult<()> {
    if table_id.is_empty() || table_id.starts_with("_") || table_id.starts_with("sqlite_") {
        return Err(BrokerError::schema("Not a user table", table_id));
    }
    Ok(())
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true)
}
