//! Change sets for observed collections.
//!
//! An observed collection is a whole table, a list column of one row, a single
//! row, or a derived view evaluated by a [`ResultsQuery`]. All four are diffed
//! from the same replayed [`TransactionChangeInfo`].

mod calculate;
mod collection_builder;

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::debug;

use crate::changeset::CollectionChangeSet;
use crate::config::NotifierConfig;
use crate::deep_change::DeepChangeChecker;
use crate::error::NotifyError;
use crate::history::{SnapshotView, VersionedSource};
use crate::index_set::IndexSet;
use crate::schema::{ColumnKind, Schema};
use crate::tracker::{replay, Interest, ListInterest, ListKey, TransactionChangeInfo};
use crate::types::{RowKey, SnapshotVersion, TableId};

pub use calculate::calculate;
pub use collection_builder::CollectionChangeBuilder;

/// A derived view over one table: filtered, sorted or distinct rows.
pub trait ResultsQuery: Send + Sync + fmt::Debug {
    /// Table the view selects rows from.
    fn table(&self) -> TableId;

    /// Evaluates the view against a snapshot.
    ///
    /// # Returns
    /// Row keys in view order, each at most once.
    fn evaluate(&self, view: &dyn SnapshotView) -> Result<Vec<RowKey>, NotifyError>;
}

/// Something an observer watches.
#[derive(Debug, Clone)]
pub enum CollectionId {
    /// Every row of a table, in table order
    Table(TableId),
    /// A list column of one row
    List(ListKey),
    /// A single row
    Object { table: TableId, key: RowKey },
    /// A derived view
    Results(Arc<dyn ResultsQuery>),
}

/// Hashable identity of a [`CollectionId`]; derived views compare by instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CollectionKey {
    Table(TableId),
    List(ListKey),
    Object(TableId, RowKey),
    Results(QueryKey),
}

/// A derived view compared and hashed by allocation.
///
/// The key owns a reference to the query, so its address cannot be handed to
/// another query while the key is alive.
#[derive(Debug, Clone)]
pub struct QueryKey(Arc<dyn ResultsQuery>);

impl QueryKey {
    fn address(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for QueryKey {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for QueryKey {}

impl Hash for QueryKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl CollectionId {
    /// Returns the identity used to share one computation between observers.
    pub fn key(&self) -> CollectionKey {
        match self {
            CollectionId::Table(table) => CollectionKey::Table(*table),
            CollectionId::List(list) => CollectionKey::List(*list),
            CollectionId::Object { table, key } => CollectionKey::Object(*table, *key),
            CollectionId::Results(query) => CollectionKey::Results(QueryKey(Arc::clone(query))),
        }
    }

    /// Returns the table the collection's elements belong to, or the owning
    /// table for a list.
    pub fn root_table(&self) -> TableId {
        match self {
            CollectionId::Table(table) | CollectionId::Object { table, .. } => *table,
            CollectionId::List(list) => list.table,
            CollectionId::Results(query) => query.table(),
        }
    }

    /// Returns every table whose changes can affect this collection.
    pub fn tables_of_interest(&self, schema: &Schema) -> BTreeSet<TableId> {
        let mut tables = schema.related_tables(self.root_table()).tables();
        tables.insert(self.root_table());
        tables
    }

    /// Returns the list to track during replay, for list collections.
    pub fn list_interest(&self, start: &dyn SnapshotView) -> Option<ListInterest> {
        match self {
            CollectionId::List(list) => Some(ListInterest::resolve(*list, start)),
            _ => None,
        }
    }

    /// Describes the collection at `view` as entirely inserted.
    ///
    /// A list whose owner does not exist, or a missing row, is reported erased.
    pub fn initial(&self, view: &dyn SnapshotView) -> Result<CollectionChangeSet, NotifyError> {
        Ok(match self {
            CollectionId::Table(table) => {
                CollectionChangeSet::initial(view.row_count(*table).unwrap_or(0))
            }
            CollectionId::List(list) => match view.list_len(list.table, list.owner, list.column) {
                Some(len) => CollectionChangeSet::initial(len),
                None => CollectionChangeSet::erased(),
            },
            CollectionId::Object { table, key } => match view.row_position(*table, *key) {
                Some(_) => CollectionChangeSet::initial(1),
                None => CollectionChangeSet::erased(),
            },
            CollectionId::Results(query) => CollectionChangeSet::initial(query.evaluate(view)?.len()),
        })
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectionId::Table(table) => write!(f, "table {table}"),
            CollectionId::List(list) => {
                write!(f, "list {}.{} of {}", list.table, list.column, list.owner)
            }
            CollectionId::Object { table, key } => write!(f, "object {table}{key}"),
            CollectionId::Results(query) => write!(f, "results over {}", query.table()),
        }
    }
}

/// Builds the change set of one collection from a replayed change record.
///
/// # Arguments
/// * `collection` - Observed collection
/// * `checker` - Deep change checker over the record and the end snapshot
/// * `start` - Snapshot at the start version
/// * `end` - Snapshot at the end version
/// * `config` - Whether deep changes are reported
///
/// # Returns
/// The change set, or the derived view's evaluation error.
pub fn collection_changes(
    collection: &CollectionId,
    checker: &mut DeepChangeChecker<'_>,
    start: &dyn SnapshotView,
    end: &dyn SnapshotView,
    config: &NotifierConfig,
) -> Result<CollectionChangeSet, NotifyError> {
    let info = checker.info();
    match collection {
        CollectionId::Table(table) => {
            let mut changes = info
                .table(*table)
                .map(|t| t.to_changeset())
                .unwrap_or_default();
            if config.deep_changes {
                let count = end.row_count(*table).unwrap_or(0);
                for position in 0..count {
                    if changes.insertions.contains(position)
                        || changes.modifications.contains(position)
                    {
                        continue;
                    }
                    if checker.is_changed_at(*table, position) {
                        changes.modifications.add(position);
                    }
                }
            }
            Ok(changes)
        }
        CollectionId::List(list) => {
            let Some(record) = info.list(list) else {
                return Ok(CollectionChangeSet::erased());
            };
            let mut changes = record.changes.clone();
            if changes.collection_was_erased || !config.deep_changes {
                return Ok(changes);
            }
            let target = end
                .schema()
                .table(list.table)
                .ok()
                .and_then(|t| t.column(list.column))
                .and_then(|c| match c.kind {
                    ColumnKind::LinkList { target } => Some(target),
                    _ => None,
                });
            if let Some(target) = target {
                let elements = end
                    .link_list(list.table, list.owner, list.column)
                    .unwrap_or_default();
                for (position, element) in elements.into_iter().enumerate() {
                    if changes.insertions.contains(position)
                        || changes.modifications.contains(position)
                    {
                        continue;
                    }
                    if checker.is_changed(target, element) {
                        changes.modifications.add(position);
                    }
                }
            }
            Ok(changes)
        }
        CollectionId::Object { table, key } => {
            if start.row_position(*table, *key).is_none() {
                return Ok(CollectionChangeSet::erased());
            }
            let Some(position) = end.row_position(*table, *key) else {
                return Ok(CollectionChangeSet {
                    deletions: IndexSet::from_range(0..1),
                    ..CollectionChangeSet::default()
                });
            };
            let mut changes = CollectionChangeSet::default();
            if let Some(record) = info.table(*table) {
                for column in record.dirty_columns(position) {
                    changes.columns.entry(column).or_default().add(0);
                }
            }
            let deep = config.deep_changes && checker.is_changed(*table, *key);
            if info.is_row_modified(*table, position) || deep {
                changes.modifications.add(0);
            }
            Ok(changes)
        }
        CollectionId::Results(query) => {
            let table = query.table();
            let old = query.evaluate(start)?;
            let new = query.evaluate(end)?;
            let record = info.table(table);
            let mut changes = calculate(&old, &new, |key| {
                let direct = end
                    .row_position(table, key)
                    .is_some_and(|p| record.is_some_and(|r| r.is_modified(p)));
                direct || (config.deep_changes && checker.is_changed(table, key))
            });
            if let Some(record) = record {
                for index in changes.modifications.iter().collect::<Vec<_>>() {
                    let Some(position) = end.row_position(table, new[index]) else {
                        continue;
                    };
                    for column in record.dirty_columns(position) {
                        changes.columns.entry(column).or_default().add(index);
                    }
                }
            }
            Ok(changes)
        }
    }
}

/// Replays the history between two versions for the given interest.
pub fn replay_range(
    source: &dyn VersionedSource,
    start: SnapshotVersion,
    end: SnapshotVersion,
    interest: &Interest,
) -> Result<TransactionChangeInfo, NotifyError> {
    let history = source.history(start, end)?;
    Ok(replay(&history, interest))
}

/// Computes how `collection` changed between two versions of `source`.
///
/// # Arguments
/// * `source` - Versioned storage
/// * `collection` - Observed collection
/// * `start` - Version the observer last saw
/// * `end` - Version to diff to
/// * `config` - Depth budget and deep change switch
///
/// # Returns
/// The change set; empty when `start == end`.
pub fn diff(
    source: &dyn VersionedSource,
    collection: &CollectionId,
    start: SnapshotVersion,
    end: SnapshotVersion,
    config: &NotifierConfig,
) -> Result<CollectionChangeSet, NotifyError> {
    if start > end {
        return Err(NotifyError::InvalidVersionRange {
            from: start,
            to: end,
        });
    }
    if start == end {
        return Ok(CollectionChangeSet::default());
    }
    let start_view = source.snapshot(start)?;
    let end_view = source.snapshot(end)?;

    let mut interest = Interest::default()
        .with_tables(collection.tables_of_interest(start_view.schema()))
        .with_tables(collection.tables_of_interest(end_view.schema()));
    if let Some(list) = collection.list_interest(start_view.as_ref()) {
        interest.add_list(list);
    }
    let info = replay_range(source, start, end, &interest)?;
    let mut checker = DeepChangeChecker::new(&info, end_view.as_ref(), config.max_link_depth);
    let changes = collection_changes(
        collection,
        &mut checker,
        start_view.as_ref(),
        end_view.as_ref(),
        config,
    )?;
    debug!(%collection, %start, %end, empty = changes.is_empty(), "diff computed");
    Ok(changes)
}
