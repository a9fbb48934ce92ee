//! Database service contract.
//!
//! The broker never owns the data store. It talks to a service that opens
//! connections (each with one open transaction), runs queries and row
//! mutations on them, and commits or rolls them back on close. Handles are
//! cheap clones that all refer to the same underlying connection.

use crate::error::BrokerResult;
use crate::models::{MutationValues, OrderedColumns, QueryParam, TableQuery, UserTable};
use crate::models::KeyValueStoreEntry;
use async_trait::async_trait;

#[async_trait]
pub trait DatabaseService: Send + Sync + 'static {
    /// Handle naming one open connection and its transaction.
    type Handle: Clone + Send + Sync + 'static;

    /// Open a connection and begin a transaction on it.
    async fn open(&self, app_name: &str) -> BrokerResult<Self::Handle>;

    /// Commit or roll back the handle's transaction and release the connection.
    async fn close_transaction(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        commit: bool,
    ) -> BrokerResult<()>;

    /// Ordered user-defined columns of a table. Errors if the table is unknown.
    async fn get_user_defined_columns(
        &self,
        app_name: &str,
        table_id: &str,
    ) -> BrokerResult<OrderedColumns>;

    async fn query(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
        columns: &OrderedColumns,
        query: &TableQuery,
    ) -> BrokerResult<UserTable>;

    async fn raw_query(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        sql: &str,
        bind_params: &[QueryParam],
    ) -> BrokerResult<UserTable>;

    async fn insert_row(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
        columns: &OrderedColumns,
        values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()>;

    async fn update_row(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
        columns: &OrderedColumns,
        values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()>;

    async fn delete_row(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()>;

    /// Insert a new in-progress version of a row.
    async fn add_checkpoint(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
        columns: &OrderedColumns,
        values: &MutationValues,
        row_id: &str,
    ) -> BrokerResult<()>;

    async fn save_checkpoint_as_incomplete(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()>;

    async fn save_checkpoint_as_complete(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
        row_id: &str,
    ) -> BrokerResult<()>;

    /// Delete the newest in-progress version of a row, or all of them.
    async fn delete_checkpoints(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
        row_id: &str,
        delete_all: bool,
    ) -> BrokerResult<()>;

    /// Key-value store entries describing a table.
    async fn get_table_metadata(
        &self,
        app_name: &str,
        handle: &Self::Handle,
        table_id: &str,
    ) -> BrokerResult<Vec<KeyValueStoreEntry>>;
}
