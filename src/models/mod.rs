//! Data models for the table broker.
//!
//! This module re-exports all model types used throughout the application.

pub mod bridge;
pub mod query;
pub mod request;
pub mod response;
pub mod schema;

// Re-export commonly used types
pub use bridge::BridgeCall;
pub use query::{ColumnValue, MutationValues, OrderDirection, QueryParam, TableQuery};
pub use request::{MutationKind, Request, RequestKind, TransactionControl};
pub use response::{ResponseData, ResponseEnvelope, ResponseMetadata};
pub use schema::{
    ADMIN_COLUMNS, ColumnDefinition, ElementDataType, KeyValueStoreEntry, OrderedColumns,
    ROW_ID_COLUMN, TableRow, UserTable,
};
