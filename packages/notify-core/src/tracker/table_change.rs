//! Row-level change tracking for one table.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::builder::CollectionChangeBuilder;
use crate::changeset::{CollectionChangeSet, Move};
use crate::index_set::IndexSet;
use crate::types::{ColumnId, TableId};

/// Accumulates the row instructions of one table over a version range.
#[derive(Debug, Clone)]
pub struct TableChangeTracker {
    table: TableId,
    changes: CollectionChangeBuilder,
}

impl TableChangeTracker {
    /// Creates an empty tracker for `table`.
    pub fn new(table: TableId) -> Self {
        Self {
            table,
            changes: CollectionChangeBuilder::for_table(),
        }
    }

    /// Returns the tracked table.
    pub fn table(&self) -> TableId {
        self.table
    }

    /// Records a row inserted at `index`.
    pub fn insert_row(&mut self, index: usize) {
        self.changes.insert(index);
    }

    /// Records the row at `index` erased.
    pub fn erase_row(&mut self, index: usize) {
        self.changes.erase(index);
    }

    /// Records a column write to the row at `index`.
    ///
    /// Default-populated values never count as modifications.
    pub fn set_column(&mut self, index: usize, column: ColumnId, is_default: bool) {
        if is_default {
            return;
        }
        self.changes.modify(index, Some(column));
    }

    /// Records the row at `from` moved to `to`.
    ///
    /// When either endpoint was written in this diff the move is reported as
    /// a deletion plus an insertion instead.
    pub fn move_row(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        if self.changes.is_modified(from) || self.changes.is_modified(to) {
            self.changes.erase(from);
            self.changes.insert(to);
        } else {
            self.changes.move_element(from, to);
        }
    }

    /// Records the rows at `a` and `b` exchanged.
    pub fn swap_rows(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        if self.changes.is_modified(low) || self.changes.is_modified(high) {
            self.changes.erase(high);
            self.changes.erase(low);
            self.changes.insert(low);
            self.changes.insert(high);
        } else {
            self.changes.swap(low, high);
        }
    }

    /// Records every row removed; `size` is the row count right before the clear.
    pub fn clear(&mut self, size: usize) {
        self.changes.clear(size);
    }

    /// Freezes the accumulated changes.
    pub fn finish(self) -> TableChangeInfo {
        let changes = self.changes.finish();
        TableChangeInfo {
            table: self.table,
            insertions: changes.insertions,
            deletions: changes.deletions,
            modifications: changes.modifications,
            moves: changes.moves,
            columns: changes.columns,
        }
    }
}

/// Immutable per-table change record for one version pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangeInfo {
    /// Table the record describes
    pub table: TableId,
    /// Rows inserted, end-state positions
    pub insertions: IndexSet,
    /// Rows deleted, start-state positions
    pub deletions: IndexSet,
    /// Rows modified in place, end-state positions
    pub modifications: IndexSet,
    /// Rows repositioned without being modified
    pub moves: Vec<Move>,
    /// Modified rows per column, end-state positions
    pub columns: BTreeMap<ColumnId, IndexSet>,
}

impl TableChangeInfo {
    /// Record for a table with no changes.
    pub fn empty(table: TableId) -> Self {
        Self {
            table,
            insertions: IndexSet::new(),
            deletions: IndexSet::new(),
            modifications: IndexSet::new(),
            moves: Vec::new(),
            columns: BTreeMap::new(),
        }
    }

    /// Returns `true` if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
            && self.deletions.is_empty()
            && self.modifications.is_empty()
            && self.moves.is_empty()
    }

    /// Returns `true` if the row at end-state `position` was modified.
    pub fn is_modified(&self, position: usize) -> bool {
        self.modifications.contains(position)
    }

    /// Returns the columns written for the row at end-state `position`.
    pub fn dirty_columns(&self, position: usize) -> Vec<ColumnId> {
        self.columns
            .iter()
            .filter(|(_, rows)| rows.contains(position))
            .map(|(column, _)| *column)
            .collect()
    }

    /// Expresses this record as a change set over the whole table.
    pub fn to_changeset(&self) -> CollectionChangeSet {
        CollectionChangeSet {
            deletions: self.deletions.clone(),
            insertions: self.insertions.clone(),
            modifications: self.modifications.clone(),
            moves: self.moves.clone(),
            columns: self.columns.clone(),
            collection_was_erased: false,
        }
    }
}
