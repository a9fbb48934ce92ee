//! Integration tests running the broker against the bundled SQLite service.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use table_broker::config::BrokerSettings;
use table_broker::db::{DatabaseService, SqliteDatabaseService, SqliteServiceOptions};
use table_broker::executor::{Broker, QueueOrder};
use table_broker::host::LocalHost;
use table_broker::models::{
    ColumnDefinition, ElementDataType, KeyValueStoreEntry, MutationKind, QueryParam, Request,
    ResponseEnvelope, TableQuery, TransactionControl,
};
use tempfile::TempDir;

type SqliteHost = LocalHost<SqliteDatabaseService>;

struct Fixture {
    _dir: TempDir,
    service: Arc<SqliteDatabaseService>,
    host: Arc<SqliteHost>,
    broker: Arc<Broker<SqliteHost>>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}", dir.path().join("tables.db").display());
        let service = SqliteDatabaseService::connect(&url, &SqliteServiceOptions::default())
            .await
            .unwrap();
        service
            .create_user_table(
                "visits",
                &[
                    ColumnDefinition::new("name", ElementDataType::String),
                    ColumnDefinition::new("age", ElementDataType::Integer),
                ],
            )
            .await
            .unwrap();
        let service = Arc::new(service);

        let host = Arc::new(LocalHost::new("survey"));
        host.bind(service.clone());
        let broker = Broker::start(
            host.clone(),
            BrokerSettings::with_queue_order(QueueOrder::Fifo),
        );
        Self {
            _dir: dir,
            service,
            host,
            broker,
        }
    }

    async fn call(&self, request: Request) -> ResponseEnvelope {
        let callback = request.callback().unwrap().to_string();
        let rx = self.host.router().expect(&callback).unwrap();
        self.broker.submit(request);
        tokio::time::timeout(Duration::from_secs(10), rx)
            .await
            .unwrap()
            .unwrap()
    }

    async fn mutate(
        &self,
        kind: MutationKind,
        row_id: &str,
        payload: Option<&str>,
        control: TransactionControl,
    ) -> ResponseEnvelope {
        self.call(Request::mutation(
            kind,
            Some("visits".to_string()),
            Some(row_id.to_string()),
            payload.map(String::from),
            format!("{:?}-{}-{}", kind, row_id, uuid_like()),
            control,
        ))
        .await
    }

    async fn versions(&self, row_id: &str) -> Vec<Vec<serde_json::Value>> {
        let envelope = self
            .call(Request::raw_query(
                "SELECT age, _savepoint_type FROM visits WHERE _id = ? ORDER BY _savepoint_timestamp, rowid",
                vec![QueryParam::from(row_id)],
                format!("versions-{}", uuid_like()),
                TransactionControl::transient(),
            ))
            .await;
        assert!(!envelope.is_error(), "{:?}", envelope.error());
        envelope.data().cloned().unwrap_or_default()
    }
}

fn uuid_like() -> String {
    table_broker::executor::generate_transaction_id()
}

#[tokio::test]
async fn test_add_row_then_query_by_id() {
    let fx = Fixture::new().await;

    let envelope = fx
        .mutate(
            MutationKind::AddRow,
            "r1",
            Some(r#"{"name":"Ann","age":7}"#),
            TransactionControl::transient(),
        )
        .await;
    assert!(!envelope.is_error(), "{:?}", envelope.error());
    assert_eq!(envelope.trans_id(), None);

    let envelope = fx
        .call(Request::table_query(
            Some("visits".to_string()),
            TableQuery::new().with_where("_id = ?", vec![QueryParam::from("r1")]),
            "query",
            TransactionControl::transient(),
        ))
        .await;
    assert!(!envelope.is_error(), "{:?}", envelope.error());
    let data = envelope.data().unwrap();
    assert_eq!(data.len(), 1);

    let metadata = envelope.metadata().unwrap();
    assert_eq!(metadata["rowIdMap"], json!({ "r1": 0 }));
    let name_idx = metadata["elementKeyMap"]["name"].as_u64().unwrap() as usize;
    let age_idx = metadata["elementKeyMap"]["age"].as_u64().unwrap() as usize;
    assert_eq!(data[0][name_idx], json!("Ann"));
    assert_eq!(data[0][age_idx], json!(7));
    assert_eq!(metadata["orderedColumns"]["age"]["elementType"], "integer");
    assert!(fx.broker.current().active_connections().is_empty());
}

#[tokio::test]
async fn test_empty_result_still_reports_columns() {
    let fx = Fixture::new().await;
    let envelope = fx
        .call(Request::table_query(
            Some("visits".to_string()),
            TableQuery::new(),
            "empty",
            TransactionControl::transient(),
        ))
        .await;
    assert_eq!(envelope.data().unwrap().len(), 0);
    let metadata = envelope.metadata().unwrap();
    assert_eq!(metadata["rowIdMap"], json!({}));
    assert!(metadata["elementKeyMap"].get("_id").is_some());
}

#[tokio::test]
async fn test_add_existing_row_and_update_missing_row_fail() {
    let fx = Fixture::new().await;
    let payload = Some(r#"{"name":"Ann"}"#);
    let ok = fx
        .mutate(MutationKind::AddRow, "r1", payload, TransactionControl::transient())
        .await;
    assert!(!ok.is_error());

    let dup = fx
        .mutate(MutationKind::AddRow, "r1", payload, TransactionControl::transient())
        .await;
    assert!(dup.error().unwrap().contains("already exists"));

    let missing = fx
        .mutate(MutationKind::UpdateRow, "r9", payload, TransactionControl::transient())
        .await;
    assert!(missing.error().unwrap().contains("not found"));
    assert!(fx.broker.current().active_connections().is_empty());
}

#[tokio::test]
async fn test_checkpoint_lifecycle() {
    let fx = Fixture::new().await;
    let transient = TransactionControl::transient;

    fx.mutate(MutationKind::AddRow, "r1", Some(r#"{"name":"Ann","age":7}"#), transient())
        .await;
    let envelope = fx
        .mutate(MutationKind::AddCheckpoint, "r1", Some(r#"{"age":8}"#), transient())
        .await;
    assert!(!envelope.is_error(), "{:?}", envelope.error());
    assert_eq!(
        fx.versions("r1").await,
        vec![vec![json!(7), json!("COMPLETE")], vec![json!(8), json!(null)]]
    );

    let envelope = fx
        .mutate(MutationKind::SaveCheckpointComplete, "r1", None, transient())
        .await;
    assert!(!envelope.is_error(), "{:?}", envelope.error());
    assert_eq!(fx.versions("r1").await, vec![vec![json!(8), json!("COMPLETE")]]);

    fx.mutate(MutationKind::AddCheckpoint, "r1", Some(r#"{"age":9}"#), transient())
        .await;
    fx.mutate(MutationKind::AddCheckpoint, "r1", Some(r#"{"age":10}"#), transient())
        .await;
    let envelope = fx
        .call(Request::delete_checkpoint(
            Some("visits".to_string()),
            Some("r1".to_string()),
            false,
            "drop-last",
            transient(),
        ))
        .await;
    assert!(!envelope.is_error());
    assert_eq!(
        fx.versions("r1").await,
        vec![vec![json!(8), json!("COMPLETE")], vec![json!(9), json!(null)]]
    );

    fx.mutate(MutationKind::SaveCheckpointIncomplete, "r1", None, transient())
        .await;
    assert_eq!(fx.versions("r1").await, vec![vec![json!(9), json!("INCOMPLETE")]]);

    fx.mutate(MutationKind::DeleteRow, "r1", None, transient()).await;
    assert!(fx.versions("r1").await.is_empty());
}

#[tokio::test]
async fn test_delete_all_checkpoints_keeps_saved_version() {
    let fx = Fixture::new().await;
    let transient = TransactionControl::transient;

    fx.mutate(MutationKind::AddRow, "r1", Some(r#"{"age":1}"#), transient())
        .await;
    fx.mutate(MutationKind::AddCheckpoint, "r1", Some(r#"{"age":2}"#), transient())
        .await;
    fx.mutate(MutationKind::AddCheckpoint, "r1", Some(r#"{"age":3}"#), transient())
        .await;
    let envelope = fx
        .call(Request::delete_checkpoint(
            Some("visits".to_string()),
            Some("r1".to_string()),
            true,
            "drop-all",
            transient(),
        ))
        .await;
    assert!(!envelope.is_error());
    assert_eq!(fx.versions("r1").await, vec![vec![json!(1), json!("COMPLETE")]]);
}

#[tokio::test]
async fn test_open_transaction_rollback_and_commit() {
    let fx = Fixture::new().await;

    let envelope = fx
        .mutate(
            MutationKind::AddRow,
            "r1",
            Some(r#"{"name":"Ann"}"#),
            TransactionControl::open(),
        )
        .await;
    let trans_id = envelope.trans_id().unwrap().to_string();
    let envelope = fx
        .call(Request::close_transaction(Some(trans_id), false, "rollback"))
        .await;
    assert!(!envelope.is_error(), "{:?}", envelope.error());
    assert!(fx.versions("r1").await.is_empty());

    let envelope = fx
        .mutate(
            MutationKind::AddRow,
            "r1",
            Some(r#"{"name":"Ann"}"#),
            TransactionControl::open(),
        )
        .await;
    let trans_id = envelope.trans_id().unwrap().to_string();
    let envelope = fx
        .mutate(
            MutationKind::UpdateRow,
            "r1",
            Some(r#"{"age":30}"#),
            TransactionControl::resume(&trans_id, true),
        )
        .await;
    assert_eq!(envelope.trans_id(), Some(trans_id.as_str()));
    let envelope = fx
        .call(Request::close_transaction(Some(trans_id), true, "commit"))
        .await;
    assert!(!envelope.is_error(), "{:?}", envelope.error());
    assert_eq!(fx.versions("r1").await, vec![vec![json!(30), json!("COMPLETE")]]);
}

#[tokio::test]
async fn test_key_value_store_in_metadata() {
    let fx = Fixture::new().await;
    fx.service
        .put_table_metadata(
            "visits",
            &KeyValueStoreEntry {
                partition: "Table".to_string(),
                aspect: "default".to_string(),
                key: "defaultViewType".to_string(),
                value_type: "integer".to_string(),
                value: Some("2".to_string()),
            },
        )
        .await
        .unwrap();

    let envelope = fx
        .call(Request::table_query(
            Some("visits".to_string()),
            TableQuery::new().with_schema_map(),
            "kvs",
            TransactionControl::transient(),
        ))
        .await;
    assert!(!envelope.is_error(), "{:?}", envelope.error());
    let list = &envelope.metadata().unwrap()["keyValueStoreList"];
    assert_eq!(list[0]["key"], "defaultViewType");
    assert_eq!(list[0]["value"], 2);
}

#[tokio::test]
async fn test_unknown_table_and_column_rejected() {
    let fx = Fixture::new().await;

    let err = fx
        .service
        .get_user_defined_columns("survey", "nowhere")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Table does not exist"));

    let envelope = fx
        .mutate(
            MutationKind::AddRow,
            "r1",
            Some(r#"{"colour":"red"}"#),
            TransactionControl::transient(),
        )
        .await;
    assert!(envelope.error().unwrap().contains("colour"));
    assert!(fx.versions("r1").await.is_empty());
}

#[tokio::test]
async fn test_raw_query_with_bind_params() {
    let fx = Fixture::new().await;
    fx.mutate(
        MutationKind::AddRow,
        "r1",
        Some(r#"{"name":"Ann","age":7}"#),
        TransactionControl::transient(),
    )
    .await;
    fx.mutate(
        MutationKind::AddRow,
        "r2",
        Some(r#"{"name":"Bob","age":40}"#),
        TransactionControl::transient(),
    )
    .await;

    let envelope = fx
        .call(Request::raw_query(
            "SELECT _id, name FROM visits WHERE age > ? ORDER BY name",
            vec![QueryParam::Int(10)],
            "raw",
            TransactionControl::transient(),
        ))
        .await;
    assert_eq!(envelope.data().unwrap(), &vec![vec![json!("r2"), json!("Bob")]]);
    assert_eq!(envelope.metadata().unwrap()["rowIdMap"], json!({ "r2": 0 }));
}
