//! Broker request model.
//!
//! A [`Request`] is one immutable unit of work queued on an executor context.
//! Each variant carries only the fields relevant to its kind; table and row
//! ids stay optional because callers arrive through a loosely typed bridge and
//! a missing id must come back as an error envelope rather than a panic.

use crate::error::{BrokerError, BrokerResult};
use crate::models::query::{QueryParam, TableQuery};
use std::fmt;

/// The eleven request kinds a context can process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    RefreshContext,
    RawQuery,
    TableQuery,
    UpdateRow,
    DeleteRow,
    AddRow,
    AddCheckpoint,
    SaveCheckpointIncomplete,
    SaveCheckpointComplete,
    DeleteLastCheckpoint,
    CloseTransaction,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RefreshContext => "refresh-context",
            Self::RawQuery => "raw-query",
            Self::TableQuery => "table-query",
            Self::UpdateRow => "update-row",
            Self::DeleteRow => "delete-row",
            Self::AddRow => "add-row",
            Self::AddCheckpoint => "add-checkpoint",
            Self::SaveCheckpointIncomplete => "save-checkpoint-incomplete",
            Self::SaveCheckpointComplete => "save-checkpoint-complete",
            Self::DeleteLastCheckpoint => "delete-last-checkpoint",
            Self::CloseTransaction => "close-transaction",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row-scoped mutation kinds sharing the `Request::Mutation` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    UpdateRow,
    DeleteRow,
    AddRow,
    AddCheckpoint,
    SaveCheckpointIncomplete,
    SaveCheckpointComplete,
}

impl MutationKind {
    pub fn request_kind(&self) -> RequestKind {
        match self {
            Self::UpdateRow => RequestKind::UpdateRow,
            Self::DeleteRow => RequestKind::DeleteRow,
            Self::AddRow => RequestKind::AddRow,
            Self::AddCheckpoint => RequestKind::AddCheckpoint,
            Self::SaveCheckpointIncomplete => RequestKind::SaveCheckpointIncomplete,
            Self::SaveCheckpointComplete => RequestKind::SaveCheckpointComplete,
        }
    }

    /// Whether the kind writes column values from the payload.
    pub fn uses_payload(&self) -> bool {
        matches!(self, Self::UpdateRow | Self::AddRow | Self::AddCheckpoint)
    }
}

/// Caller-controlled transaction handling shared by every caller request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionControl {
    /// Id of an open transaction to continue, or `None` for a fresh one
    pub transaction_id: Option<String>,
    /// Tri-state: `None` and `Some(false)` both commit/roll back on completion
    pub leave_open: Option<bool>,
}

impl TransactionControl {
    /// Run in a transient transaction that closes on completion.
    pub fn transient() -> Self {
        Self::default()
    }

    /// Start a fresh transaction and keep it open afterwards.
    pub fn open() -> Self {
        Self {
            transaction_id: None,
            leave_open: Some(true),
        }
    }

    /// Continue an existing transaction.
    pub fn resume(transaction_id: impl Into<String>, leave_open: bool) -> Self {
        Self {
            transaction_id: Some(transaction_id.into()),
            leave_open: Some(leave_open),
        }
    }

    pub fn leave_open(&self) -> bool {
        self.leave_open.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Control request: release the context this one superseded.
    RefreshContext { reason: String },
    RawQuery {
        sql: String,
        bind_params: Vec<QueryParam>,
        control: TransactionControl,
        callback: String,
    },
    TableQuery {
        table_id: Option<String>,
        query: TableQuery,
        control: TransactionControl,
        callback: String,
    },
    Mutation {
        kind: MutationKind,
        table_id: Option<String>,
        row_id: Option<String>,
        /// String-encoded column map; ignored by kinds that write no values
        payload: Option<String>,
        control: TransactionControl,
        callback: String,
    },
    DeleteCheckpoint {
        table_id: Option<String>,
        row_id: Option<String>,
        delete_all: bool,
        control: TransactionControl,
        callback: String,
    },
    CloseTransaction {
        transaction_id: Option<String>,
        commit: bool,
        callback: String,
    },
}

impl Request {
    pub fn refresh_context(reason: impl Into<String>) -> Self {
        Self::RefreshContext {
            reason: reason.into(),
        }
    }

    pub fn raw_query(
        sql: impl Into<String>,
        bind_params: Vec<QueryParam>,
        callback: impl Into<String>,
        control: TransactionControl,
    ) -> Self {
        Self::RawQuery {
            sql: sql.into(),
            bind_params,
            control,
            callback: callback.into(),
        }
    }

    pub fn table_query(
        table_id: Option<String>,
        query: TableQuery,
        callback: impl Into<String>,
        control: TransactionControl,
    ) -> Self {
        Self::TableQuery {
            table_id,
            query,
            control,
            callback: callback.into(),
        }
    }

    pub fn mutation(
        kind: MutationKind,
        table_id: Option<String>,
        row_id: Option<String>,
        payload: Option<String>,
        callback: impl Into<String>,
        control: TransactionControl,
    ) -> Self {
        Self::Mutation {
            kind,
            table_id,
            row_id,
            payload,
            control,
            callback: callback.into(),
        }
    }

    pub fn delete_checkpoint(
        table_id: Option<String>,
        row_id: Option<String>,
        delete_all: bool,
        callback: impl Into<String>,
        control: TransactionControl,
    ) -> Self {
        Self::DeleteCheckpoint {
            table_id,
            row_id,
            delete_all,
            control,
            callback: callback.into(),
        }
    }

    pub fn close_transaction(
        transaction_id: Option<String>,
        commit: bool,
        callback: impl Into<String>,
    ) -> Self {
        Self::CloseTransaction {
            transaction_id,
            commit,
            callback: callback.into(),
        }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            Self::RefreshContext { .. } => RequestKind::RefreshContext,
            Self::RawQuery { .. } => RequestKind::RawQuery,
            Self::TableQuery { .. } => RequestKind::TableQuery,
            Self::Mutation { kind, .. } => kind.request_kind(),
            Self::DeleteCheckpoint { .. } => RequestKind::DeleteLastCheckpoint,
            Self::CloseTransaction { .. } => RequestKind::CloseTransaction,
        }
    }

    /// Control requests carry no callback and produce no envelope.
    pub fn is_control(&self) -> bool {
        matches!(self, Self::RefreshContext { .. })
    }

    /// Callback token echoed back in the response envelope.
    pub fn callback(&self) -> Option<&str> {
        match self {
            Self::RefreshContext { .. } => None,
            Self::RawQuery { callback, .. }
            | Self::TableQuery { callback, .. }
            | Self::Mutation { callback, .. }
            | Self::DeleteCheckpoint { callback, .. }
            | Self::CloseTransaction { callback, .. } => Some(callback),
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::RefreshContext { .. } => None,
            Self::CloseTransaction { transaction_id, .. } => transaction_id.as_deref(),
            Self::RawQuery { control, .. }
            | Self::TableQuery { control, .. }
            | Self::Mutation { control, .. }
            | Self::DeleteCheckpoint { control, .. } => control.transaction_id.as_deref(),
        }
    }

    /// Whether the transaction stays open after this request completes.
    ///
    /// Close-transaction requests always close.
    pub fn leave_open(&self) -> bool {
        match self {
            Self::RefreshContext { .. } | Self::CloseTransaction { .. } => false,
            Self::RawQuery { control, .. }
            | Self::TableQuery { control, .. }
            | Self::Mutation { control, .. }
            | Self::DeleteCheckpoint { control, .. } => control.leave_open(),
        }
    }

    pub fn table_id(&self) -> Option<&str> {
        match self {
            Self::TableQuery { table_id, .. }
            | Self::Mutation { table_id, .. }
            | Self::DeleteCheckpoint { table_id, .. } => table_id.as_deref(),
            _ => None,
        }
    }

    pub fn row_id(&self) -> Option<&str> {
        match self {
            Self::Mutation { row_id, .. } | Self::DeleteCheckpoint { row_id, .. } => {
                row_id.as_deref()
            }
            _ => None,
        }
    }

    /// Check that every field the kind requires is present.
    pub fn validate(&self) -> BrokerResult<()> {
        match self {
            Self::CloseTransaction {
                transaction_id: None,
                ..
            } => Err(BrokerError::invalid_input(
                "close requested without a transaction id",
            )),
            Self::RawQuery { sql, .. } if sql.trim().is_empty() => {
                Err(BrokerError::missing_field("sqlCommand"))
            }
            Self::TableQuery { table_id: None, .. } => Err(BrokerError::missing_field("tableId")),
            Self::Mutation {
                table_id, row_id, ..
            }
            | Self::DeleteCheckpoint {
                table_id, row_id, ..
            } => {
                if table_id.is_none() {
                    return Err(BrokerError::missing_field("tableId"));
                }
                if row_id.is_none() {
                    return Err(BrokerError::missing_field("rowId"));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let req = Request::mutation(
            MutationKind::SaveCheckpointComplete,
            Some("t".to_string()),
            Some("r".to_string()),
            None,
            "cb",
            TransactionControl::transient(),
        );
        assert_eq!(req.kind(), RequestKind::SaveCheckpointComplete);
        assert_eq!(req.kind().to_string(), "save-checkpoint-complete");
        assert_eq!(
            Request::refresh_context("x").kind(),
            RequestKind::RefreshContext
        );
    }

    #[test]
    fn test_leave_open_tri_state() {
        assert!(!TransactionControl::default().leave_open());
        assert!(TransactionControl::open().leave_open());
        assert!(!TransactionControl::resume("tx_1", false).leave_open());
    }

    #[test]
    fn test_close_never_leaves_open() {
        let req = Request::close_transaction(Some("tx_1".to_string()), true, "cb");
        assert!(!req.leave_open());
        assert_eq!(req.transaction_id(), Some("tx_1"));
    }

    #[test]
    fn test_validate_missing_row_id() {
        let req = Request::mutation(
            MutationKind::UpdateRow,
            Some("t".to_string()),
            None,
            Some("{}".to_string()),
            "cb",
            TransactionControl::transient(),
        );
        let err = req.validate().unwrap_err();
        assert_eq!(err.to_string(), "rowId cannot be null");
    }

    #[test]
    fn test_validate_missing_table_id() {
        let req =
            Request::table_query(None, TableQuery::new(), "cb", TransactionControl::transient());
        assert_eq!(req.validate().unwrap_err().to_string(), "tableId cannot be null");
        let req = Request::delete_checkpoint(
            None,
            Some("r".to_string()),
            true,
            "cb",
            TransactionControl::transient(),
        );
        assert_eq!(req.validate().unwrap_err().to_string(), "tableId cannot be null");
    }

    #[test]
    fn test_validate_close_without_id() {
        let req = Request::close_transaction(None, true, "cb");
        assert!(
            req.validate()
                .unwrap_err()
                .to_string()
                .contains("close requested without a transaction id")
        );
    }

    #[test]
    fn test_control_request_has_no_callback() {
        let req = Request::refresh_context("swap");
        assert!(req.is_control());
        assert_eq!(req.callback(), None);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_payload_kinds() {
        assert!(MutationKind::AddRow.uses_payload());
        assert!(!MutationKind::DeleteRow.uses_payload());
        assert!(!MutationKind::SaveCheckpointIncomplete.uses_payload());
    }
}
