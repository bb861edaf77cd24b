//! Transitive change detection through links.
//!
//! A row counts as changed when it was modified itself or when a row reachable
//! from it through link columns was modified, within a bounded number of hops.

use std::collections::HashMap;

use tracing::trace;

use crate::history::SnapshotView;
use crate::schema::LinkShape;
use crate::tracker::TransactionChangeInfo;
use crate::types::{RowKey, TableId};

/// Memoized outcome for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reach {
    /// Nothing reachable from the row was modified
    Unchanged,
    /// A modified row is reachable within this many hops
    ChangedWithin(usize),
}

/// Row on the current search path.
#[derive(Debug, Clone, Copy)]
struct Frame {
    table: TableId,
    key: RowKey,
    /// Part of the subgraph below this row was not explored
    truncated: bool,
}

/// Answers "is this row transitively affected?" for one change record.
///
/// Results are memoized for the lifetime of the checker, which is tied to a
/// single [`TransactionChangeInfo`], so checking many roots against the same
/// record does not re-walk shared subgraphs.
pub struct DeepChangeChecker<'a> {
    info: &'a TransactionChangeInfo,
    view: &'a dyn SnapshotView,
    max_depth: usize,
    memo: HashMap<(TableId, RowKey), Reach>,
    path: Vec<Frame>,
}

impl<'a> DeepChangeChecker<'a> {
    /// Creates a checker.
    ///
    /// # Arguments
    /// * `info` - Change record of the version pair
    /// * `view` - Snapshot at the end version, used to resolve positions and links
    /// * `max_depth` - Number of link hops a modification may be away from the root
    ///   and still be found, exclusive
    pub fn new(info: &'a TransactionChangeInfo, view: &'a dyn SnapshotView, max_depth: usize) -> Self {
        Self {
            info,
            view,
            max_depth,
            memo: HashMap::new(),
            path: Vec::new(),
        }
    }

    /// Returns the change record this checker answers for.
    pub fn info(&self) -> &'a TransactionChangeInfo {
        self.info
    }

    /// Returns `true` if the row `key` of `table` was modified, directly or
    /// through a row reachable from it in fewer than `max_depth` hops.
    pub fn is_changed(&mut self, table: TableId, key: RowKey) -> bool {
        if self.is_modified(table, key) {
            return true;
        }
        if !self.info.has_modifications() {
            return false;
        }
        self.path.clear();
        let changed = self.check_row(table, key, 0).is_some();
        trace!(%table, %key, changed, "deep change check");
        changed
    }

    /// Same as [`is_changed`](Self::is_changed), addressing the row by its
    /// end-state position.
    pub fn is_changed_at(&mut self, table: TableId, position: usize) -> bool {
        match self.view.row_key(table, position) {
            Some(key) => self.is_changed(table, key),
            None => false,
        }
    }

    fn is_modified(&self, table: TableId, key: RowKey) -> bool {
        self.view
            .row_position(table, key)
            .is_some_and(|position| self.info.is_row_modified(table, position))
    }

    /// Returns the distance to a modified row reachable from `key`, searching
    /// no further than the remaining depth budget.
    fn check_row(&mut self, table: TableId, key: RowKey, depth: usize) -> Option<usize> {
        if self.is_modified(table, key) {
            return Some(0);
        }
        match self.memo.get(&(table, key)) {
            Some(Reach::Unchanged) => return None,
            Some(Reach::ChangedWithin(distance)) if depth + distance < self.max_depth => {
                return Some(*distance);
            }
            _ => {}
        }
        if depth + 1 >= self.max_depth {
            self.truncate_parent();
            return None;
        }
        if self.path.iter().any(|f| f.table == table && f.key == key) {
            for frame in &mut self.path {
                frame.truncated = true;
            }
            return None;
        }

        self.path.push(Frame {
            table,
            key,
            truncated: false,
        });
        let mut found = None;
        for (target_table, target) in self.links_of(table, key) {
            if let Some(distance) = self.check_row(target_table, target, depth + 1) {
                found = Some(distance + 1);
                break;
            }
        }
        let truncated = self.path.pop().is_some_and(|f| f.truncated);

        match found {
            Some(distance) => {
                let entry = self
                    .memo
                    .entry((table, key))
                    .or_insert(Reach::ChangedWithin(distance));
                if let Reach::ChangedWithin(known) = entry {
                    *known = (*known).min(distance);
                }
            }
            None if truncated => self.truncate_parent(),
            None => {
                self.memo.insert((table, key), Reach::Unchanged);
            }
        }
        found
    }

    fn truncate_parent(&mut self) {
        if let Some(parent) = self.path.last_mut() {
            parent.truncated = true;
        }
    }

    /// Resolves every row `key` links to at the end version.
    fn links_of(&self, table: TableId, key: RowKey) -> Vec<(TableId, RowKey)> {
        let Ok(schema) = self.view.schema().table(table) else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        for relation in schema.relations() {
            match relation.shape {
                LinkShape::Single => {
                    if let Some(target) = self.view.link(table, key, relation.from_column) {
                        targets.push((relation.to_table, target));
                    }
                }
                LinkShape::List => {
                    if let Some(list) = self.view.link_list(table, key, relation.from_column) {
                        targets.extend(list.into_iter().map(|t| (relation.to_table, t)));
                    }
                }
            }
        }
        targets
    }
}
