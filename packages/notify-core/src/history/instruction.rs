//! Normalized mutation instructions replayed between two versions.

use serde::{Deserialize, Serialize};

use crate::schema::ColumnKind;
use crate::types::{ColumnId, RowKey, TableId};

/// One element-level mutation.
///
/// Row instructions apply to the table chosen by the latest `SelectTable`.
/// List instructions apply to the list chosen by the latest `SelectList`,
/// which in turn belongs to a row of the selected table. Indices are positions
/// in the state produced by every preceding instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Choose the table subsequent row instructions apply to
    SelectTable(TableId),
    /// Insert a row with the given key at `index`
    InsertRow { index: usize, key: RowKey },
    /// Erase the row with the given key at `index`
    EraseRow { index: usize, key: RowKey },
    /// Write a column of the row at `index`
    Set {
        index: usize,
        column: ColumnId,
        /// Value was populated as a default rather than written by the user
        is_default: bool,
    },
    /// Move the row at `from` so that it ends at `to`
    MoveRow { from: usize, to: usize },
    /// Exchange the rows at `a` and `b`
    SwapRows { a: usize, b: usize },
    /// Remove every row; `size` is the row count right before the clear
    ClearTable { size: usize },
    /// Add a column to the selected table
    AddColumn { column: ColumnId },
    /// Remove a column from the selected table
    RemoveColumn { column: ColumnId },
    /// Change the kind or nullability of a column
    ChangeColumn {
        column: ColumnId,
        kind: ColumnKind,
        nullable: bool,
    },
    /// Choose the list subsequent list instructions apply to
    SelectList {
        column: ColumnId,
        /// Position of the owning row
        row: usize,
        /// Key of the owning row
        key: RowKey,
    },
    /// Insert an element at `index`
    ListInsert { index: usize },
    /// Erase the element at `index`
    ListErase { index: usize },
    /// Replace the element at `index`
    ListSet { index: usize },
    /// Move the element at `from` so that it ends at `to`
    ListMove { from: usize, to: usize },
    /// Exchange the elements at `a` and `b`
    ListSwap { a: usize, b: usize },
    /// Remove every element; `size` is the length right before the clear
    ListClear { size: usize },
}

impl Instruction {
    /// Returns `true` for instructions operating on the selected list.
    pub fn is_list_instruction(&self) -> bool {
        matches!(
            self,
            Instruction::ListInsert { .. }
                | Instruction::ListErase { .. }
                | Instruction::ListSet { .. }
                | Instruction::ListMove { .. }
                | Instruction::ListSwap { .. }
                | Instruction::ListClear { .. }
        )
    }
}
