//! Incremental edit accumulator for one ordered collection.

use std::collections::BTreeMap;

use crate::changeset::{CollectionChangeSet, Move};
use crate::index_set::IndexSet;
use crate::types::ColumnId;

/// Move recorded while replaying, with whether the element had been written
/// before it was moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingMove {
    from: usize,
    to: usize,
    modified: bool,
}

/// Accumulates element-level edits into a minimal change set.
///
/// Deletions are kept in start-state space. Insertions, modifications and
/// pending move destinations are kept in the current space and shifted as
/// later edits arrive, so that the final state is already expressed in
/// end-state space.
#[derive(Debug, Clone, Default)]
pub struct CollectionChangeBuilder {
    insertions: IndexSet,
    deletions: IndexSet,
    modifications: IndexSet,
    moves: Vec<PendingMove>,
    columns: BTreeMap<ColumnId, IndexSet>,
    track_columns: bool,
    replace_after_erase: bool,
    last_erase: Option<usize>,
}

impl CollectionChangeBuilder {
    /// Builder for a list: a value written right after an erase at the same
    /// position replaces the element.
    pub fn for_list() -> Self {
        Self {
            replace_after_erase: true,
            ..Self::default()
        }
    }

    /// Builder for table rows with per-column dirty tracking.
    pub fn for_table() -> Self {
        Self {
            track_columns: true,
            ..Self::default()
        }
    }

    /// Returns `true` if no edit has been recorded.
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
            && self.deletions.is_empty()
            && self.modifications.is_empty()
            && self.moves.is_empty()
    }

    /// Returns `true` if the element currently at `index` was inserted in this diff.
    pub fn is_inserted(&self, index: usize) -> bool {
        self.insertions.contains(index)
    }

    /// Returns `true` if the element currently at `index` is marked modified.
    pub fn is_modified(&self, index: usize) -> bool {
        self.modifications.contains(index)
    }

    /// Returns the current modification set.
    pub fn modifications(&self) -> &IndexSet {
        &self.modifications
    }

    /// Records an insertion at `index`.
    pub fn insert(&mut self, index: usize) {
        self.last_erase = None;
        for column in self.columns.values_mut() {
            column.shift_for_insert_at(index, 1);
        }
        self.modifications.shift_for_insert_at(index, 1);
        self.insertions.insert_at(index, 1);
        for m in &mut self.moves {
            if m.to >= index {
                m.to += 1;
            }
        }
    }

    /// Records the erasure of the element at `index`.
    ///
    /// Erasing a pending insertion cancels it. Erasing a pending move
    /// destination retracts the move, leaving a plain deletion of its source.
    pub fn erase(&mut self, index: usize) {
        for column in self.columns.values_mut() {
            column.erase_at(index);
        }
        self.modifications.erase_at(index);
        if let Some(unshifted) = self.insertions.erase_or_unshift(index) {
            self.deletions.add_shifted(unshifted);
        }
        self.moves.retain(|m| m.to != index);
        for m in &mut self.moves {
            if m.to > index {
                m.to -= 1;
            }
        }
        self.last_erase = Some(index);
    }

    /// Marks the element at `index` modified.
    ///
    /// A write to a pending insertion is covered by the insertion; if that
    /// insertion is a move destination the move is retracted and the element
    /// is reported as deleted and inserted instead.
    pub fn modify(&mut self, index: usize, column: Option<ColumnId>) {
        self.last_erase = None;
        if self.insertions.contains(index) {
            self.moves.retain(|m| m.to != index);
            return;
        }
        self.modifications.add(index);
        if let (true, Some(column)) = (self.track_columns, column) {
            self.columns.entry(column).or_default().add(index);
        }
    }

    /// Records a value write to the list element at `index`.
    pub fn set(&mut self, index: usize) {
        if self.replace_after_erase && self.last_erase == Some(index) {
            self.erase(index);
            self.insert(index);
            return;
        }
        self.modify(index, None);
    }

    /// Moves the element at `from` so that it ends up at `to`.
    ///
    /// Consecutive moves of the same element collapse into one. Other pending
    /// move destinations between the two positions shift by one.
    pub fn move_element(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        self.last_erase = None;
        let was_modified = self.modifications.contains(from);

        let mut updated_existing = false;
        for m in &mut self.moves {
            if m.to != from {
                if m.to >= to && m.to < from {
                    m.to += 1;
                } else if m.to <= to && m.to > from {
                    m.to -= 1;
                }
                continue;
            }
            debug_assert!(!updated_existing, "two pending moves share a destination");
            m.to = to;
            m.modified |= was_modified;
            updated_existing = true;
        }

        if updated_existing {
            self.insertions.erase_at(from);
            self.insertions.insert_at(to, 1);
        } else {
            let unshifted = self.insertions.erase_or_unshift(from);
            self.insertions.insert_at(to, 1);
            // Moving an element inserted in this diff is just a different insertion point.
            if let Some(unshifted) = unshifted {
                let start_index = self.deletions.add_shifted(unshifted);
                self.moves.push(PendingMove {
                    from: start_index,
                    to,
                    modified: was_modified,
                });
            }
        }

        for column in self.columns.values_mut() {
            column.erase_at(from);
            column.shift_for_insert_at(to, 1);
        }
        self.modifications.erase_at(from);
        self.modifications.shift_for_insert_at(to, 1);
    }

    /// Exchanges the elements at `a` and `b`, expressed as two moves.
    pub fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        self.move_element(low, high);
        if high - 1 != low {
            self.move_element(high - 1, low);
        }
    }

    /// Removes every element; `size` is the current length.
    ///
    /// Only elements present at the start are reported as deleted.
    pub fn clear(&mut self, size: usize) {
        let start_size = size + self.deletions.len() - self.insertions.len();
        self.insertions.clear();
        self.modifications.clear();
        self.moves.clear();
        self.columns.clear();
        self.deletions.set(start_size);
        self.last_erase = None;
    }

    /// Drops moves that no longer change the element's relative position and
    /// produces the final change set.
    pub fn finish(mut self) -> CollectionChangeSet {
        let mut moves = Vec::with_capacity(self.moves.len());
        for m in std::mem::take(&mut self.moves) {
            let from_rank = m.from - self.deletions.count(0, m.from);
            let to_rank = m.to - self.insertions.count(0, m.to);
            if from_rank == to_rank {
                self.deletions.remove(m.from);
                self.insertions.remove(m.to);
                if m.modified {
                    self.modifications.add(m.to);
                }
            } else {
                moves.push(Move::new(m.from, m.to));
            }
        }
        moves.sort_by_key(|m| m.from);

        self.columns.retain(|_, set| !set.is_empty());
        CollectionChangeSet {
            deletions: self.deletions,
            insertions: self.insertions,
            modifications: self.modifications,
            moves,
            columns: self.columns,
            collection_was_erased: false,
        }
    }
}
