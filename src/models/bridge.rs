//! Loosely typed bridge calls.
//!
//! The UI talks to the broker through JSON objects tagged by `"action"`, one per
//! call, using the camelCase argument names of the scripting bridge. Decoding a
//! call yields the typed [`Request`] queued on the context.

use crate::error::{BrokerError, BrokerResult};
use crate::models::query::{OrderDirection, QueryParam, TableQuery};
use crate::models::request::{MutationKind, Request, TransactionControl};
use serde::Deserialize;

/// Fields shared by every bridge call that can run inside a transaction.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeTransaction {
    #[serde(rename = "callbackJSON")]
    pub callback_json: String,
    #[serde(default)]
    pub trans_id: Option<String>,
    #[serde(default)]
    pub leave_transaction_open: Option<bool>,
}

impl BridgeTransaction {
    fn control(&self) -> TransactionControl {
        TransactionControl {
            transaction_id: self.trans_id.clone(),
            leave_open: self.leave_transaction_open,
        }
    }
}

/// Arguments of the row mutation calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRowArgs {
    #[serde(default)]
    pub table_id: Option<String>,
    /// String-encoded column map
    #[serde(default, rename = "stringifiedJSON")]
    pub stringified_json: Option<String>,
    #[serde(default)]
    pub row_id: Option<String>,
    #[serde(flatten)]
    pub transaction: BridgeTransaction,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BridgeCall {
    #[serde(rename_all = "camelCase")]
    Query {
        #[serde(default)]
        table_id: Option<String>,
        #[serde(default)]
        where_clause: Option<String>,
        #[serde(default)]
        sql_bind_params: Vec<QueryParam>,
        #[serde(default)]
        group_by: Vec<String>,
        #[serde(default)]
        having: Option<String>,
        #[serde(default)]
        order_by_element_key: Option<String>,
        #[serde(default)]
        order_by_direction: Option<String>,
        #[serde(default)]
        include_key_value_store_map: bool,
        #[serde(flatten)]
        transaction: BridgeTransaction,
    },
    #[serde(rename_all = "camelCase")]
    RawQuery {
        sql_command: String,
        #[serde(default)]
        sql_bind_params: Vec<QueryParam>,
        #[serde(flatten)]
        transaction: BridgeTransaction,
    },
    UpdateRow(BridgeRowArgs),
    DeleteRow(BridgeRowArgs),
    AddRow(BridgeRowArgs),
    AddCheckpoint(BridgeRowArgs),
    SaveCheckpointAsIncomplete(BridgeRowArgs),
    SaveCheckpointAsComplete(BridgeRowArgs),
    #[serde(rename_all = "camelCase")]
    DeleteLastCheckpoint {
        #[serde(default)]
        table_id: Option<String>,
        #[serde(default)]
        row_id: Option<String>,
        #[serde(default)]
        delete_all_checkpoints: bool,
        #[serde(flatten)]
        transaction: BridgeTransaction,
    },
    #[serde(rename_all = "camelCase")]
    CloseTransaction {
        #[serde(default)]
        trans_id: Option<String>,
        #[serde(default)]
        commit_transaction: bool,
        #[serde(rename = "callbackJSON")]
        callback_json: String,
    },
}

impl BridgeCall {
    /// Decode one JSON bridge call.
    pub fn parse(json: &str) -> BrokerResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Callback token of the call.
    pub fn callback(&self) -> &str {
        match self {
            Self::Query { transaction, .. }
            | Self::RawQuery { transaction, .. }
            | Self::DeleteLastCheckpoint { transaction, .. } => &transaction.callback_json,
            Self::UpdateRow(args)
            | Self::DeleteRow(args)
            | Self::AddRow(args)
            | Self::AddCheckpoint(args)
            | Self::SaveCheckpointAsIncomplete(args)
            | Self::SaveCheckpointAsComplete(args) => &args.transaction.callback_json,
            Self::CloseTransaction { callback_json, .. } => callback_json,
        }
    }

    /// Convert into the typed request.
    pub fn into_request(self) -> BrokerResult<Request> {
        let request = match self {
            Self::Query {
                table_id,
                where_clause,
                sql_bind_params,
                group_by,
                having,
                order_by_element_key,
                order_by_direction,
                include_key_value_store_map,
                transaction,
            } => {
                let order_by_direction = order_by_direction
                    .as_deref()
                    .map(OrderDirection::parse)
                    .transpose()?;
                let query = TableQuery {
                    where_clause,
                    bind_params: sql_bind_params,
                    group_by,
                    having,
                    order_by_key: order_by_element_key,
                    order_by_direction,
                    include_schema_map: include_key_value_store_map,
                };
                let control = transaction.control();
                Request::table_query(table_id, query, transaction.callback_json, control)
            }
            Self::RawQuery {
                sql_command,
                sql_bind_params,
                transaction,
            } => {
                let control = transaction.control();
                Request::raw_query(
                    sql_command,
                    sql_bind_params,
                    transaction.callback_json,
                    control,
                )
            }
            Self::UpdateRow(args) => row_request(MutationKind::UpdateRow, args),
            Self::DeleteRow(args) => row_request(MutationKind::DeleteRow, args),
            Self::AddRow(args) => row_request(MutationKind::AddRow, args),
            Self::AddCheckpoint(args) => row_request(MutationKind::AddCheckpoint, args),
            Self::SaveCheckpointAsIncomplete(args) => {
                row_request(MutationKind::SaveCheckpointIncomplete, args)
            }
            Self::SaveCheckpointAsComplete(args) => {
                row_request(MutationKind::SaveCheckpointComplete, args)
            }
            Self::DeleteLastCheckpoint {
                table_id,
                row_id,
                delete_all_checkpoints,
                transaction,
            } => {
                let control = transaction.control();
                Request::delete_checkpoint(
                    table_id,
                    row_id,
                    delete_all_checkpoints,
                    transaction.callback_json,
                    control,
                )
            }
            Self::CloseTransaction {
                trans_id,
                commit_transaction,
                callback_json,
            } => Request::close_transaction(trans_id, commit_transaction, callback_json),
        };
        Ok(request)
    }
}

fn row_request(kind: MutationKind, args: BridgeRowArgs) -> Request {
    let control = args.transaction.control();
    Request::mutation(
        kind,
        args.table_id,
        args.row_id,
        args.stringified_json,
        args.transaction.callback_json,
        control,
    )
}

/// Best-effort callback extraction from a call that failed to decode.
pub fn salvage_callback(json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(json).ok()?;
    value
        .get("callbackJSON")
        .and_then(|v| v.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::RequestKind;

    #[test]
    fn test_parse_query_call() {
        let call = BridgeCall::parse(
            r#"{"action":"query","tableId":"t","whereClause":"_id = ?","sqlBindParams":["r1"],
                "orderByElementKey":"name","orderByDirection":"desc",
                "includeKeyValueStoreMap":true,"callbackJSON":"cb-1","leaveTransactionOpen":true}"#,
        )
        .unwrap();
        assert_eq!(call.callback(), "cb-1");
        let req = call.into_request().unwrap();
        assert_eq!(req.kind(), RequestKind::TableQuery);
        assert!(req.leave_open());
        match req {
            Request::TableQuery { query, table_id, .. } => {
                assert_eq!(table_id.as_deref(), Some("t"));
                assert_eq!(query.order_by_direction, Some(OrderDirection::Desc));
                assert!(query.include_schema_map);
                assert_eq!(query.bind_params, vec![QueryParam::String("r1".to_string())]);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_parse_row_call_with_null_row_id() {
        let call = BridgeCall::parse(
            r#"{"action":"updateRow","tableId":"t","stringifiedJSON":"{\"a\":1}","rowId":null,"callbackJSON":"cb","transId":"tx_1"}"#,
        )
        .unwrap();
        let req = call.into_request().unwrap();
        assert_eq!(req.kind(), RequestKind::UpdateRow);
        assert_eq!(req.row_id(), None);
        assert_eq!(req.transaction_id(), Some("tx_1"));
    }

    #[test]
    fn test_parse_checkpoint_calls() {
        let req = BridgeCall::parse(
            r#"{"action":"saveCheckpointAsIncomplete","tableId":"t","rowId":"r","callbackJSON":"cb"}"#,
        )
        .unwrap()
        .into_request()
        .unwrap();
        assert_eq!(req.kind(), RequestKind::SaveCheckpointIncomplete);

        let req = BridgeCall::parse(
            r#"{"action":"deleteLastCheckpoint","tableId":"t","rowId":"r","deleteAllCheckpoints":true,"callbackJSON":"cb"}"#,
        )
        .unwrap()
        .into_request()
        .unwrap();
        assert!(matches!(req, Request::DeleteCheckpoint { delete_all: true, .. }));
    }

    #[test]
    fn test_parse_close_transaction() {
        let req = BridgeCall::parse(
            r#"{"action":"closeTransaction","transId":"tx_9","commitTransaction":true,"callbackJSON":"cb"}"#,
        )
        .unwrap()
        .into_request()
        .unwrap();
        assert_eq!(
            req,
            Request::close_transaction(Some("tx_9".to_string()), true, "cb")
        );
    }

    #[test]
    fn test_unknown_action_is_invalid_input() {
        let err = BridgeCall::parse(r#"{"action":"dropEverything","callbackJSON":"cb"}"#)
            .unwrap_err();
        assert!(matches!(err, BrokerError::InvalidInput { .. }));
        assert_eq!(
            salvage_callback(r#"{"action":"dropEverything","callbackJSON":"cb"}"#).as_deref(),
            Some("cb")
        );
    }

    #[test]
    fn test_bad_direction_rejected() {
        let call = BridgeCall::parse(
            r#"{"action":"query","tableId":"t","orderByDirection":"up","callbackJSON":"cb"}"#,
        )
        .unwrap();
        assert!(call.into_request().is_err());
    }
}
