//! Replays an instruction stream into per-table and per-list change records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::table_change::{TableChangeInfo, TableChangeTracker};
use crate::builder::CollectionChangeBuilder;
use crate::changeset::CollectionChangeSet;
use crate::history::{Instruction, SnapshotView};
use crate::schema::ColumnKind;
use crate::types::{ColumnId, RowKey, TableId};

/// Identity of a list column of one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListKey {
    /// Table of the owning row
    pub table: TableId,
    /// List column
    pub column: ColumnId,
    /// Owning row
    pub owner: RowKey,
}

/// A list to track during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListInterest {
    /// List identity
    pub key: ListKey,
    /// Length at the start version, `None` when the owner did not exist
    pub start_len: Option<usize>,
    /// Link target table for link lists
    pub target: Option<TableId>,
}

impl ListInterest {
    /// Resolves the start length and link target of `key` from the start snapshot.
    pub fn resolve(key: ListKey, start: &dyn SnapshotView) -> Self {
        let target = start
            .schema()
            .table(key.table)
            .ok()
            .and_then(|t| t.column(key.column))
            .and_then(|c| match c.kind {
                ColumnKind::LinkList { target } => Some(target),
                _ => None,
            });
        Self {
            key,
            start_len: start.list_len(key.table, key.owner, key.column),
            target,
        }
    }
}

/// What a replay should track.
#[derive(Debug, Clone, Default)]
pub struct Interest {
    /// Tables whose rows are tracked
    pub tables: BTreeSet<TableId>,
    /// Lists whose elements are tracked
    pub lists: Vec<ListInterest>,
}

impl Interest {
    /// Adds tables to track.
    pub fn with_tables(mut self, tables: impl IntoIterator<Item = TableId>) -> Self {
        self.tables.extend(tables);
        self
    }

    /// Adds a list to track, ignoring duplicates.
    pub fn add_list(&mut self, list: ListInterest) {
        if !self.lists.iter().any(|l| l.key == list.key) {
            self.lists.push(list);
        }
    }
}

/// Change record of one tracked list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListChangeInfo {
    /// List identity
    pub key: ListKey,
    /// Element-level changes, or an erased marker
    pub changes: CollectionChangeSet,
}

/// Every change record produced by one replay of a version range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionChangeInfo {
    /// Per-table row changes for the tracked tables
    pub tables: BTreeMap<TableId, TableChangeInfo>,
    /// Per-list element changes for the tracked lists
    pub lists: Vec<ListChangeInfo>,
}

impl TransactionChangeInfo {
    /// Returns the record of `table`, if it was tracked.
    pub fn table(&self, table: TableId) -> Option<&TableChangeInfo> {
        self.tables.get(&table)
    }

    /// Returns the record of a tracked list.
    pub fn list(&self, key: &ListKey) -> Option<&ListChangeInfo> {
        self.lists.iter().find(|l| l.key == *key)
    }

    /// Returns `true` if the row at end-state `position` of `table` was modified.
    pub fn is_row_modified(&self, table: TableId, position: usize) -> bool {
        self.tables
            .get(&table)
            .is_some_and(|t| t.is_modified(position))
    }

    /// Returns `true` if any tracked table has a modified row.
    pub fn has_modifications(&self) -> bool {
        self.tables.values().any(|t| !t.modifications.is_empty())
    }
}

/// Replay state of one list.
struct ListReplay {
    interest: ListInterest,
    len: usize,
    erased: bool,
    builder: CollectionChangeBuilder,
}

impl ListReplay {
    fn new(interest: ListInterest) -> Self {
        Self {
            len: interest.start_len.unwrap_or(0),
            erased: interest.start_len.is_none(),
            interest,
            builder: CollectionChangeBuilder::for_list(),
        }
    }

    fn finish(self) -> ListChangeInfo {
        let changes = if self.erased {
            CollectionChangeSet::erased()
        } else {
            self.builder.finish()
        };
        ListChangeInfo {
            key: self.interest.key,
            changes,
        }
    }
}

/// Selected list: its owner position for marking the owner row, and the
/// tracked list it maps to, if any.
struct ListSelection {
    table: TableId,
    column: ColumnId,
    row: usize,
    tracked: Option<usize>,
}

/// Replays `instructions` and produces the change records for `interest`.
///
/// Malformed streams (row instructions without a selected table, list
/// instructions without a selected list) are contract violations of the
/// producer and panic.
pub fn replay<'a, I>(instructions: I, interest: &Interest) -> TransactionChangeInfo
where
    I: IntoIterator<Item = &'a Instruction>,
{
    let mut trackers: BTreeMap<TableId, TableChangeTracker> = interest
        .tables
        .iter()
        .map(|&t| (t, TableChangeTracker::new(t)))
        .collect();
    let mut lists: Vec<ListReplay> = interest.lists.iter().cloned().map(ListReplay::new).collect();

    let mut current_table: Option<TableId> = None;
    let mut selection: Option<ListSelection> = None;
    let mut replayed = 0usize;

    for instruction in instructions {
        replayed += 1;
        trace!(?instruction, "replaying instruction");
        if instruction.is_list_instruction() {
            let selected = selection
                .as_ref()
                .expect("list instruction without a selected list");
            // A list edit is a write to the owner's list column.
            if let Some(tracker) = trackers.get_mut(&selected.table) {
                tracker.set_column(selected.row, selected.column, false);
            }
            if let Some(list) = selected.tracked.and_then(|i| lists.get_mut(i)) {
                if !list.erased {
                    apply_list_instruction(list, instruction);
                }
            }
            continue;
        }

        match instruction {
            Instruction::SelectTable(table) => {
                current_table = Some(*table);
                selection = None;
            }
            Instruction::SelectList { column, row, key } => {
                let table = current_table.expect("list selected without a selected table");
                let tracked = lists.iter().position(|l| {
                    let k = &l.interest.key;
                    k.table == table && k.column == *column && k.owner == *key
                });
                selection = Some(ListSelection {
                    table,
                    column: *column,
                    row: *row,
                    tracked,
                });
            }
            Instruction::InsertRow { index, .. } => {
                let table = current_table.expect("row instruction without a selected table");
                if let Some(tracker) = trackers.get_mut(&table) {
                    tracker.insert_row(*index);
                }
            }
            Instruction::EraseRow { index, key } => {
                let table = current_table.expect("row instruction without a selected table");
                if let Some(tracker) = trackers.get_mut(&table) {
                    tracker.erase_row(*index);
                }
                for list in lists
                    .iter_mut()
                    .filter(|l| l.interest.key.table == table && l.interest.key.owner == *key)
                {
                    list.erased = true;
                }
            }
            Instruction::Set {
                index,
                column,
                is_default,
            } => {
                let table = current_table.expect("row instruction without a selected table");
                if let Some(tracker) = trackers.get_mut(&table) {
                    tracker.set_column(*index, *column, *is_default);
                }
            }
            Instruction::MoveRow { from, to } => {
                let table = current_table.expect("row instruction without a selected table");
                if let Some(tracker) = trackers.get_mut(&table) {
                    tracker.move_row(*from, *to);
                }
            }
            Instruction::SwapRows { a, b } => {
                let table = current_table.expect("row instruction without a selected table");
                if let Some(tracker) = trackers.get_mut(&table) {
                    tracker.swap_rows(*a, *b);
                }
            }
            Instruction::ClearTable { size } => {
                let table = current_table.expect("row instruction without a selected table");
                if let Some(tracker) = trackers.get_mut(&table) {
                    tracker.clear(*size);
                }
                for list in lists.iter_mut() {
                    if list.interest.key.table == table {
                        list.erased = true;
                    } else if list.interest.target == Some(table) && !list.erased {
                        list.builder.clear(list.len);
                        list.len = 0;
                    }
                }
            }
            Instruction::AddColumn { .. } => {}
            Instruction::RemoveColumn { column } => {
                let table = current_table.expect("column instruction without a selected table");
                for list in lists.iter_mut().filter(|l| {
                    l.interest.key.table == table && l.interest.key.column == *column
                }) {
                    list.erased = true;
                }
            }
            Instruction::ChangeColumn { column, kind, .. } => {
                let table = current_table.expect("column instruction without a selected table");
                if !kind.is_list() {
                    for list in lists.iter_mut().filter(|l| {
                        l.interest.key.table == table && l.interest.key.column == *column
                    }) {
                        list.erased = true;
                    }
                }
            }
            _ => unreachable!("list instructions are handled above"),
        }
    }

    let info = TransactionChangeInfo {
        tables: trackers
            .into_iter()
            .map(|(table, tracker)| (table, tracker.finish()))
            .collect(),
        lists: lists.into_iter().map(ListReplay::finish).collect(),
    };
    debug!(
        instructions = replayed,
        tables = info.tables.len(),
        lists = info.lists.len(),
        "replay complete"
    );
    info
}

fn apply_list_instruction(list: &mut ListReplay, instruction: &Instruction) {
    match instruction {
        Instruction::ListInsert { index } => {
            debug_assert!(*index <= list.len);
            list.builder.insert(*index);
            list.len += 1;
        }
        Instruction::ListErase { index } => {
            debug_assert!(*index < list.len);
            list.builder.erase(*index);
            list.len -= 1;
        }
        Instruction::ListSet { index } => list.builder.set(*index),
        Instruction::ListMove { from, to } => list.builder.move_element(*from, *to),
        Instruction::ListSwap { a, b } => list.builder.swap(*a, *b),
        Instruction::ListClear { size } => {
            debug_assert_eq!(*size, list.len);
            list.builder.clear(*size);
            list.len = 0;
        }
        _ => unreachable!("not a list instruction"),
    }
}
