//! Immutable committed state of the reference store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use super::value::Value;
use crate::error::NotifyError;
use crate::history::SnapshotView;
use crate::schema::Schema;
use crate::types::{ColumnId, RowKey, SnapshotVersion, TableId};

/// One stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Row {
    /// Stable key
    pub key: RowKey,
    /// Column values
    pub values: BTreeMap<ColumnId, Value>,
}

/// Rows of one table in table order, with a key index.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableData {
    rows: Vec<Row>,
    #[serde(skip)]
    positions: HashMap<RowKey, usize>,
}

impl TableData {
    /// Returns the rows in table order.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the position of the row with `key`.
    pub fn position(&self, key: RowKey) -> Option<usize> {
        self.positions.get(&key).copied()
    }

    pub fn row(&self, key: RowKey) -> Option<&Row> {
        self.position(key).map(|p| &self.rows[p])
    }

    pub(crate) fn row_at_mut(&mut self, position: usize) -> Option<&mut Row> {
        self.rows.get_mut(position)
    }

    pub(crate) fn rows_mut(&mut self) -> impl Iterator<Item = &mut Row> {
        self.rows.iter_mut()
    }

    pub(crate) fn insert(&mut self, index: usize, row: Row) {
        self.rows.insert(index, row);
        self.reindex(index);
    }

    pub(crate) fn remove(&mut self, index: usize) -> Row {
        let row = self.rows.remove(index);
        self.positions.remove(&row.key);
        self.reindex(index);
        row
    }

    pub(crate) fn move_row(&mut self, from: usize, to: usize) {
        let row = self.rows.remove(from);
        self.rows.insert(to, row);
        self.reindex(from.min(to));
    }

    pub(crate) fn swap(&mut self, a: usize, b: usize) {
        self.rows.swap(a, b);
        self.reindex(a.min(b));
    }

    pub(crate) fn clear(&mut self) {
        self.rows.clear();
        self.positions.clear();
    }

    fn reindex(&mut self, from: usize) {
        for (position, row) in self.rows.iter().enumerate().skip(from) {
            self.positions.insert(row.key, position);
        }
    }
}

/// Store contents pinned at one committed version.
///
/// Tables are shared between versions and copied only when a write
/// transaction touches them.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub(crate) version: SnapshotVersion,
    pub(crate) schema: Arc<Schema>,
    pub(crate) tables: BTreeMap<TableId, Arc<TableData>>,
    pub(crate) next_key: u64,
}

impl StoreSnapshot {
    /// Creates the empty initial snapshot for `schema`.
    pub(crate) fn initial(schema: Schema) -> Self {
        let tables = schema
            .tables()
            .map(|t| (t.id, Arc::new(TableData::default())))
            .collect();
        Self {
            version: SnapshotVersion::default(),
            schema: Arc::new(schema),
            tables,
            next_key: 0,
        }
    }

    /// Returns the rows of `table`.
    pub fn table(&self, table: TableId) -> Result<&TableData, NotifyError> {
        self.tables
            .get(&table)
            .map(Arc::as_ref)
            .ok_or(NotifyError::TableNotFound { table })
    }

    /// Returns a cell value.
    pub fn get(&self, table: TableId, key: RowKey, column: ColumnId) -> Option<&Value> {
        self.tables.get(&table)?.row(key)?.values.get(&column)
    }

    /// Dumps the snapshot as pretty-printed JSON for debugging.
    pub fn to_json(&self) -> Result<String, NotifyError> {
        let dump = Dump {
            version: self.version,
            schema: &self.schema,
            tables: self.tables.iter().map(|(id, t)| (*id, t.as_ref())).collect(),
        };
        serde_json::to_string_pretty(&dump).map_err(|e| NotifyError::Serialization(e.to_string()))
    }
}

#[derive(Serialize)]
struct Dump<'a> {
    version: SnapshotVersion,
    schema: &'a Schema,
    tables: BTreeMap<TableId, &'a TableData>,
}

impl SnapshotView for StoreSnapshot {
    fn version(&self) -> SnapshotVersion {
        self.version
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn row_count(&self, table: TableId) -> Option<usize> {
        self.tables.get(&table).map(|t| t.len())
    }

    fn row_position(&self, table: TableId, key: RowKey) -> Option<usize> {
        self.tables.get(&table)?.position(key)
    }

    fn row_key(&self, table: TableId, position: usize) -> Option<RowKey> {
        self.tables.get(&table)?.rows.get(position).map(|r| r.key)
    }

    fn link(&self, table: TableId, key: RowKey, column: ColumnId) -> Option<RowKey> {
        self.get(table, key, column)?.as_link()
    }

    fn link_list(&self, table: TableId, key: RowKey, column: ColumnId) -> Option<Vec<RowKey>> {
        match self.get(table, key, column)? {
            Value::LinkList(targets) => Some(targets.clone()),
            _ => None,
        }
    }

    fn list_len(&self, table: TableId, key: RowKey, column: ColumnId) -> Option<usize> {
        match self.get(table, key, column)? {
            Value::LinkList(targets) => Some(targets.len()),
            Value::Array(values) => Some(values.len()),
            _ => None,
        }
    }

    fn row_keys(&self, table: TableId) -> Vec<RowKey> {
        self.tables
            .get(&table)
            .map(|t| t.rows.iter().map(|r| r.key).collect())
            .unwrap_or_default()
    }
}
