//! Per-context cache of table column definitions.

use crate::models::OrderedColumns;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Append-only `table_id -> columns` map. Entries are never evicted; the
/// cache is discarded with its context.
#[derive(Debug, Default)]
pub struct ColumnCache {
    tables: RwLock<HashMap<String, Arc<OrderedColumns>>>,
}

impl ColumnCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table_id: &str) -> Option<Arc<OrderedColumns>> {
        self.tables.read().get(table_id).cloned()
    }

    /// Insert columns for their table. A table already cached keeps its first
    /// entry, which is returned.
    pub fn insert(&self, columns: OrderedColumns) -> Arc<OrderedColumns> {
        let mut tables = self.tables.write();
        tables
            .entry(columns.table_id().to_string())
            .or_insert_with(|| Arc::new(columns))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}
