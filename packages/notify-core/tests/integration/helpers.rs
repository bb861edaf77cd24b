//! Shared fixtures: an item/owner schema and a value-sorted derived view.

use std::sync::Arc;

use notify_core::schema::{ColumnKind, ColumnSchema, Schema, TableSchema};
use notify_core::store::{MemoryStore, Value};
use notify_core::tracker::ListKey;
use notify_core::{
    CollectionChangeSet, CollectionId, NotifierConfig, NotifyError, ResultsQuery, RowKey,
    SnapshotVersion, SnapshotView, TableId,
};

pub const ITEM: TableId = TableId(0);
pub const OWNER: TableId = TableId(1);

pub const VALUE: notify_core::ColumnId = notify_core::ColumnId(0);
pub const NEXT: notify_core::ColumnId = notify_core::ColumnId(1);
pub const TAGS: notify_core::ColumnId = notify_core::ColumnId(2);

pub const NAME: notify_core::ColumnId = notify_core::ColumnId(0);
pub const ITEMS: notify_core::ColumnId = notify_core::ColumnId(1);

/// Items carry an int value, an optional link to another item and an int
/// array. Owners hold an ordered list of items.
pub fn schema() -> Schema {
    Schema::with_tables([
        TableSchema::new(
            ITEM,
            "item",
            vec![
                ColumnSchema::new(VALUE, "value", ColumnKind::Int),
                ColumnSchema::new(NEXT, "next", ColumnKind::Link { target: ITEM }).nullable(),
                ColumnSchema::new(TAGS, "tags", ColumnKind::Array),
            ],
        ),
        TableSchema::new(
            OWNER,
            "owner",
            vec![
                ColumnSchema::new(NAME, "name", ColumnKind::Text),
                ColumnSchema::new(ITEMS, "items", ColumnKind::LinkList { target: ITEM }),
            ],
        ),
    ])
}

pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(schema()))
}

/// Appends `count` items whose value is their position.
pub fn populate(store: &MemoryStore, count: usize) -> Vec<RowKey> {
    let mut keys = Vec::with_capacity(count);
    store
        .write(|tx| {
            for i in 0..count {
                let key = tx.push_row(ITEM)?;
                tx.set(ITEM, key, VALUE, i as i64)?;
                keys.push(key);
            }
            Ok(())
        })
        .unwrap();
    keys
}

/// Creates an owner whose list holds `items`, in order.
pub fn owner_with(store: &MemoryStore, items: &[RowKey]) -> ListKey {
    let mut owner = RowKey(0);
    store
        .write(|tx| {
            owner = tx.push_row(OWNER)?;
            for item in items {
                tx.list_push(OWNER, owner, ITEMS, *item)?;
            }
            Ok(())
        })
        .unwrap();
    ListKey {
        table: OWNER,
        column: ITEMS,
        owner,
    }
}

pub fn shallow() -> NotifierConfig {
    NotifierConfig {
        deep_changes: false,
        ..NotifierConfig::default()
    }
}

pub fn diff(
    store: &MemoryStore,
    collection: &CollectionId,
    start: SnapshotVersion,
    end: SnapshotVersion,
) -> CollectionChangeSet {
    notify_core::diff(store, collection, start, end, &NotifierConfig::default()).unwrap()
}

pub fn indices(set: &notify_core::IndexSet) -> Vec<usize> {
    set.iter().collect()
}

/// Items with `value >= min`, ordered by value then key.
#[derive(Debug)]
pub struct SortedByValue {
    pub store: Arc<MemoryStore>,
    pub min: i64,
}

impl ResultsQuery for SortedByValue {
    fn table(&self) -> TableId {
        ITEM
    }

    fn evaluate(&self, view: &dyn SnapshotView) -> Result<Vec<RowKey>, NotifyError> {
        let snapshot = self.store.snapshot_at(view.version())?;
        let mut rows: Vec<(i64, RowKey)> = snapshot
            .row_keys(ITEM)
            .into_iter()
            .filter_map(|key| match snapshot.get(ITEM, key, VALUE) {
                Some(Value::Int(v)) if *v >= self.min => Some((*v, key)),
                _ => None,
            })
            .collect();
        rows.sort();
        Ok(rows.into_iter().map(|(_, key)| key).collect())
    }
}

/// A derived view that always fails to evaluate.
#[derive(Debug)]
pub struct Broken;

impl ResultsQuery for Broken {
    fn table(&self) -> TableId {
        ITEM
    }

    fn evaluate(&self, _view: &dyn SnapshotView) -> Result<Vec<RowKey>, NotifyError> {
        Err(NotifyError::Query("index unavailable".to_string()))
    }
}
