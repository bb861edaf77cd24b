//! Change sets delivered to observers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::index_set::IndexSet;
use crate::types::ColumnId;

/// An element that survived a repositioning.
///
/// `from` indexes the start state and `to` the end state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// Position before the transaction
    pub from: usize,
    /// Position after the transaction
    pub to: usize,
}

impl Move {
    /// Creates a move record.
    pub fn new(from: usize, to: usize) -> Self {
        Self { from, to }
    }
}

/// Description of how an observed collection changed between two versions.
///
/// Deletions index the start state; insertions, modifications and the
/// per-column sets index the end state. Every move is also present as a
/// deletion of `from` and an insertion of `to`. To reproduce the end state,
/// apply deletions in descending order, then insertions in ascending order,
/// then modifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionChangeSet {
    /// Positions removed, in start-state space
    pub deletions: IndexSet,
    /// Positions added, in end-state space
    pub insertions: IndexSet,
    /// Positions whose element changed in place, in end-state space
    pub modifications: IndexSet,
    /// Elements repositioned without being modified
    pub moves: Vec<Move>,
    /// Modified positions per column, in end-state space
    pub columns: BTreeMap<ColumnId, IndexSet>,
    /// The collection's owner no longer exists
    pub collection_was_erased: bool,
}

impl CollectionChangeSet {
    /// Change set announcing that the observed collection is gone.
    pub fn erased() -> Self {
        Self {
            collection_was_erased: true,
            ..Self::default()
        }
    }

    /// Change set describing a collection of `len` elements as all-new.
    pub fn initial(len: usize) -> Self {
        Self {
            insertions: IndexSet::from_range(0..len),
            ..Self::default()
        }
    }

    /// Returns `true` if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.insertions.is_empty()
            && self.modifications.is_empty()
            && self.moves.is_empty()
            && !self.collection_was_erased
    }

    /// Returns the dirty positions for `column`.
    pub fn column(&self, column: ColumnId) -> Option<&IndexSet> {
        self.columns.get(&column)
    }

    /// Applies this change set to `start`, taking new and modified values from `end`.
    ///
    /// # Arguments
    /// * `start` - Collection contents at the start version
    /// * `end` - Collection contents at the end version
    ///
    /// # Returns
    /// The reconstructed end state. Equal to `end` when the change set is exact.
    pub fn apply<T: Clone>(&self, start: &[T], end: &[T]) -> Vec<T> {
        if self.collection_was_erased {
            return Vec::new();
        }
        let mut values = start.to_vec();
        for index in self.deletions.iter().rev() {
            values.remove(index);
        }
        for index in self.insertions.iter() {
            values.insert(index, end[index].clone());
        }
        for index in self.modifications.iter() {
            values[index] = end[index].clone();
        }
        values
    }
}
