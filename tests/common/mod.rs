//! Shared helpers for broker integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use table_broker::db::DatabaseService;
use table_broker::error::{BrokerError, BrokerResult};
use table_broker::host::LocalHost;
use table_broker::models::{
    ColumnDefinition, ElementDataType, KeyValueStoreEntry, MutationValues, OrderedColumns,
    QueryParam, ResponseEnvelope, TableQuery, TableRow, UserTable,
};
use tokio::sync::oneshot;

pub const APP: &str = "survey";

/// Raw statement the mock holds for [`SLOW_DELAY`] before answering.
pub const SLOW_SQL: &str = "SLOW";
pub const SLOW_DELAY: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockHandle {
    pub id: u64,
}

/// In-memory service that records what the broker asks of it.
#[derive(Default)]
pub struct MockService {
    next_id: AtomicU64,
    opens: AtomicUsize,
    pub fail_open: AtomicBool,
    pub fail_commit: AtomicBool,
    tables: Mutex<HashMap<String, OrderedColumns>>,
    closes: Mutex<Vec<(u64, bool)>>,
    executed: Mutex<Vec<String>>,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        let service = Self::default();
        service.tables.lock().insert(
            "visits".to_string(),
            OrderedColumns::new(
                "visits",
                vec![
                    ColumnDefinition::new("name", ElementDataType::String),
                    ColumnDefinition::new("age", ElementDataType::Integer),
                ],
            ),
        );
        Arc::new(service)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> Vec<(u64, bool)> {
        self.closes.lock().clone()
    }

    /// Calls that reached the service, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    fn record(&self, entry: impl Into<String>) {
        self.executed.lock().push(entry.into());
    }
}

#[async_trait]
impl DatabaseService for MockService {
    type Handle = MockHandle;

    async fn open(&self, app_name: &str) -> BrokerResult<MockHandle> {
        assert_eq!(app_name, APP);
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(BrokerError::connection("refused", "retry later"));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn close_transaction(
        &self,
        _app_name: &str,
        handle: &MockHandle,
        commit: bool,
    ) -> BrokerResult<()> {
        self.closes.lock().push((handle.id, commit));
        if commit && self.fail_commit.load(Ordering::SeqCst) {
            return Err(BrokerError::database("disk full", None, "free space"));
        }
        Ok(())
    }

    async fn get_user_defined_columns(
        &self,
        _app_name: &str,
        table_id: &str,
    ) -> BrokerResult<OrderedColumns> {
        self.tables
            .lock()
            .get(table_id)
            .cloned()
            .ok_or_else(|| BrokerError::schema("Table does not exist", table_id))
    }

    async fn query(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        table_id: &str,
        _columns: &OrderedColumns,
        _query: &TableQuery,
    ) -> BrokerResult<UserTable> {
        self.record(format!("query:{}", table_id));
        Ok(UserTable::new(
            vec!["_id".to_string(), "name".to_string(), "age".to_string()],
            vec![
                TableRow {
                    row_id: Some("r1".to_string()),
                    values: vec![json!("r1"), json!("Ann"), json!(7)],
                },
                TableRow {
                    row_id: Some("r2".to_string()),
                    values: vec![json!("r2"), json!("Bob"), json!(9)],
                },
            ],
        ))
    }

    async fn raw_query(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        sql: &str,
        _bind_params: &[QueryParam],
    ) -> BrokerResult<UserTable> {
        self.record(sql);
        if sql == SLOW_SQL {
            tokio::time::sleep(SLOW_DELAY).await;
        }
        Ok(UserTable::new(
            vec!["sql".to_string()],
            vec![TableRow {
                row_id: None,
                values: vec![json!(sql)],
            }],
        ))
    }

    async fn insert_row(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        table_id: &str,
        _columns: &OrderedColumns,
        values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()> {
        self.record(format!("insert:{}:{}:{}", table_id, row_id, values.len()));
        Ok(())
    }

    async fn update_row(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        table_id: &str,
        _columns: &OrderedColumns,
        values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()> {
        self.record(format!("update:{}:{}:{}", table_id, row_id, values.len()));
        Ok(())
    }

    async fn delete_row(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()> {
        self.record(format!("delete:{}:{}", table_id, row_id));
        Ok(())
    }

    async fn add_checkpoint(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        table_id: &str,
        _columns: &OrderedColumns,
        _values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()> {
        self.record(format!("checkpoint:{}:{}", table_id, row_id));
        Ok(())
    }

    async fn save_checkpoint_as_incomplete(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()> {
        self.record(format!("incomplete:{}:{}", table_id, row_id));
        Ok(())
    }

    async fn save_checkpoint_as_complete(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()> {
        self.record(format!("complete:{}:{}", table_id, row_id));
        Ok(())
    }

    async fn delete_checkpoints(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        table_id: &str,
        row_id: &str,
        delete_all: bool,
    ) -> BrokerResult<()> {
        self.record(format!("delete_checkpoints:{}:{}:{}", table_id, row_id, delete_all));
        Ok(())
    }

    async fn get_table_metadata(
        &self,
        _app_name: &str,
        _handle: &MockHandle,
        _table_id: &str,
    ) -> BrokerResult<Vec<KeyValueStoreEntry>> {
        Ok(vec![KeyValueStoreEntry {
            partition: "Table".to_string(),
            aspect: "default".to_string(),
            key: "displayName".to_string(),
            value_type: "string".to_string(),
            value: Some("Visits".to_string()),
        }])
    }
}

pub type MockHost = LocalHost<MockService>;

/// Host with `service` already bound.
pub fn bound_host(service: &Arc<MockService>) -> Arc<MockHost> {
    let host = Arc::new(LocalHost::new(APP));
    host.bind(service.clone());
    host
}

/// Wait for an awaited envelope, failing the test after five seconds.
pub async fn recv(rx: oneshot::Receiver<ResponseEnvelope>) -> ResponseEnvelope {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("timed out waiting for envelope")
        .expect("router dropped the waiter")
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
