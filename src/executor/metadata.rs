//! Metadata attached to query results.

use crate::models::{KeyValueStoreEntry, OrderedColumns, ResponseMetadata, UserTable};
use serde_json::Value as JsonValue;

/// Hook that adds application-specific entries to query metadata.
pub trait QueryMetadataExtender: Send + Sync {
    fn extend(&self, table: &UserTable, metadata: &mut ResponseMetadata);
}

/// Extender that adds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtension;

impl QueryMetadataExtender for NoExtension {
    fn extend(&self, _table: &UserTable, _metadata: &mut ResponseMetadata) {}
}

/// Base metadata of a result set: `rowIdMap` and `elementKeyMap`, plus
/// `orderedColumns` for table queries and `keyValueStoreList` when requested.
pub fn query_metadata(
    table: &UserTable,
    columns: Option<&OrderedColumns>,
    key_value_store: Option<&[KeyValueStoreEntry]>,
) -> ResponseMetadata {
    let mut metadata = ResponseMetadata::new();
    metadata.insert("rowIdMap".to_string(), to_json_map(table.row_id_map()));
    metadata.insert(
        "elementKeyMap".to_string(),
        to_json_map(table.element_key_map()),
    );
    if let Some(columns) = columns {
        metadata.insert(
            "orderedColumns".to_string(),
            JsonValue::Object(columns.data_model()),
        );
    }
    if let Some(entries) = key_value_store {
        metadata.insert(
            "keyValueStoreList".to_string(),
            JsonValue::Array(entries.iter().map(KeyValueStoreEntry::to_metadata).collect()),
        );
    }
    metadata
}

fn to_json_map(map: std::collections::BTreeMap<String, usize>) -> JsonValue {
    JsonValue::Object(
        map.into_iter()
            .map(|(k, v)| (k, JsonValue::from(v)))
            .collect(),
    )
}
