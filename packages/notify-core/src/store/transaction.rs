//! Write transactions against the reference store.
//!
//! A transaction edits a private copy of the head snapshot and records every
//! edit as an [`Instruction`]. Committing publishes the copy as the next
//! version together with its instruction log.

use std::sync::Arc;

use tracing::debug;

use super::snapshot::{Row, StoreSnapshot, TableData};
use super::value::Value;
use super::MemoryStore;
use crate::error::NotifyError;
use crate::history::Instruction;
use crate::schema::{ColumnKind, ColumnSchema, LinkShape, TableSchema};
use crate::types::{ColumnId, RowKey, SnapshotVersion, TableId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    Aborted,
}

/// The single open write transaction of a [`MemoryStore`].
///
/// If the transaction is neither committed nor aborted it is aborted when
/// dropped.
pub struct WriteTransaction<'a> {
    store: &'a MemoryStore,
    staged: StoreSnapshot,
    log: Vec<Instruction>,
    selected_table: Option<TableId>,
    selected_list: Option<(TableId, ColumnId, RowKey)>,
    state: TxState,
}

impl<'a> WriteTransaction<'a> {
    pub(super) fn new(store: &'a MemoryStore, base: StoreSnapshot) -> Self {
        Self {
            store,
            staged: base,
            log: Vec::new(),
            selected_table: None,
            selected_list: None,
            state: TxState::Active,
        }
    }

    /// Returns the state as edited so far.
    pub fn staged(&self) -> &StoreSnapshot {
        &self.staged
    }

    /// Returns the instructions recorded so far.
    pub fn instructions(&self) -> &[Instruction] {
        &self.log
    }

    /// Returns whether the transaction is still active.
    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// Adds a table. Tables are not part of the instruction stream.
    pub fn create_table(&mut self, table: TableSchema) -> Result<(), NotifyError> {
        self.ensure_active()?;
        let id = table.id;
        Arc::make_mut(&mut self.staged.schema).insert_table(table);
        self.staged
            .tables
            .entry(id)
            .or_insert_with(|| Arc::new(TableData::default()));
        Ok(())
    }

    /// Inserts a row with default values at `index`.
    ///
    /// # Returns
    /// `Result<RowKey, NotifyError>` containing the new row's key.
    pub fn insert_row(&mut self, table: TableId, index: usize) -> Result<RowKey, NotifyError> {
        self.ensure_active()?;
        let schema = self.staged.schema.table(table)?;
        let values = schema
            .columns
            .iter()
            .map(|c| (c.id, Value::default_for(c.kind, c.nullable)))
            .collect();
        let len = self.staged.table(table)?.len();
        if index > len {
            return Err(NotifyError::InvalidIndex { table, index, len });
        }

        let key = RowKey(self.staged.next_key);
        self.staged.next_key += 1;
        self.table_mut(table)?.insert(index, Row { key, values });
        self.select_row_context(table);
        self.log.push(Instruction::InsertRow { index, key });
        Ok(key)
    }

    /// Appends a row with default values.
    pub fn push_row(&mut self, table: TableId) -> Result<RowKey, NotifyError> {
        let len = self.staged.table(table)?.len();
        self.insert_row(table, len)
    }

    /// Erases a row, first unlinking it from every link and link list.
    pub fn erase_row(&mut self, table: TableId, key: RowKey) -> Result<(), NotifyError> {
        self.ensure_active()?;
        self.position(table, key)?;
        self.unlink(table, key)?;

        let index = self.position(table, key)?;
        self.table_mut(table)?.remove(index);
        self.select_row_context(table);
        self.log.push(Instruction::EraseRow { index, key });
        Ok(())
    }

    /// Writes a non-list column.
    pub fn set(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        value: impl Into<Value>,
    ) -> Result<(), NotifyError> {
        self.write(table, key, column, value.into(), false)
    }

    /// Writes a non-list column as a default-populated value.
    pub fn set_default(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        value: impl Into<Value>,
    ) -> Result<(), NotifyError> {
        self.write(table, key, column, value.into(), true)
    }

    /// Moves the row at `from` so that it ends at `to`.
    pub fn move_row(&mut self, table: TableId, from: usize, to: usize) -> Result<(), NotifyError> {
        self.ensure_active()?;
        let len = self.staged.table(table)?.len();
        for index in [from, to] {
            if index >= len {
                return Err(NotifyError::InvalidIndex { table, index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        self.table_mut(table)?.move_row(from, to);
        self.select_row_context(table);
        self.log.push(Instruction::MoveRow { from, to });
        Ok(())
    }

    /// Exchanges the rows at `a` and `b`.
    pub fn swap_rows(&mut self, table: TableId, a: usize, b: usize) -> Result<(), NotifyError> {
        self.ensure_active()?;
        let len = self.staged.table(table)?.len();
        for index in [a, b] {
            if index >= len {
                return Err(NotifyError::InvalidIndex { table, index, len });
            }
        }
        if a == b {
            return Ok(());
        }
        self.table_mut(table)?.swap(a, b);
        self.select_row_context(table);
        self.log.push(Instruction::SwapRows { a, b });
        Ok(())
    }

    /// Removes every row of `table`.
    ///
    /// Links into the table are dropped without recording list instructions.
    pub fn clear_table(&mut self, table: TableId) -> Result<(), NotifyError> {
        self.ensure_active()?;
        let size = self.staged.table(table)?.len();
        self.table_mut(table)?.clear();
        self.select_row_context(table);
        self.log.push(Instruction::ClearTable { size });

        for relation in self.staged.schema.incoming(table) {
            let column = relation.from_column;
            for row in self.table_mut(relation.from_table)?.rows_mut() {
                match row.values.get_mut(&column) {
                    Some(Value::Link(target)) => *target = None,
                    Some(Value::LinkList(targets)) => targets.clear(),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Adds a column to `table`, populating every row with its default.
    pub fn add_column(&mut self, table: TableId, column: ColumnSchema) -> Result<(), NotifyError> {
        self.ensure_active()?;
        let id = column.id;
        let default = Value::default_for(column.kind, column.nullable);
        let schema = Arc::make_mut(&mut self.staged.schema).table_mut(table)?;
        if schema.column(id).is_some() {
            return Err(NotifyError::SchemaMismatch {
                table,
                column: id,
                reason: "column already exists".to_string(),
            });
        }
        schema.columns.push(column);
        for row in self.table_mut(table)?.rows_mut() {
            row.values.insert(id, default.clone());
        }
        self.select_table(table);
        self.log.push(Instruction::AddColumn { column: id });
        Ok(())
    }

    /// Removes a column from `table`.
    pub fn remove_column(&mut self, table: TableId, column: ColumnId) -> Result<(), NotifyError> {
        self.ensure_active()?;
        let schema = Arc::make_mut(&mut self.staged.schema).table_mut(table)?;
        let index = schema.column_index(column)?;
        schema.columns.remove(index);
        for row in self.table_mut(table)?.rows_mut() {
            row.values.remove(&column);
        }
        self.select_table(table);
        self.log.push(Instruction::RemoveColumn { column });
        Ok(())
    }

    /// Changes the kind or nullability of a column, resetting its values.
    pub fn change_column(
        &mut self,
        table: TableId,
        column: ColumnId,
        kind: ColumnKind,
        nullable: bool,
    ) -> Result<(), NotifyError> {
        self.ensure_active()?;
        let schema = Arc::make_mut(&mut self.staged.schema).table_mut(table)?;
        let index = schema.column_index(column)?;
        schema.columns[index].kind = kind;
        schema.columns[index].nullable = nullable;
        let default = Value::default_for(kind, nullable);
        for row in self.table_mut(table)?.rows_mut() {
            row.values.insert(column, default.clone());
        }
        self.select_table(table);
        self.log.push(Instruction::ChangeColumn {
            column,
            kind,
            nullable,
        });
        Ok(())
    }

    /// Inserts an element into a list column.
    ///
    /// Link lists take `Value::Link(Some(target))` elements, arrays take
    /// primitive values.
    pub fn list_insert(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        index: usize,
        element: impl Into<Value>,
    ) -> Result<(), NotifyError> {
        let row = self.list_context(table, key, column)?;
        let element = self.check_element(table, column, element.into())?;
        let len = self.list_len(table, row, column);
        if index > len {
            return Err(NotifyError::InvalidIndex { table, index, len });
        }
        self.select_list(table, column, key, row);
        match (self.list_mut(table, row, column)?, element) {
            (Value::LinkList(targets), Value::Link(Some(target))) => targets.insert(index, target),
            (Value::Array(values), element) => values.insert(index, element),
            _ => {}
        }
        self.log.push(Instruction::ListInsert { index });
        Ok(())
    }

    /// Appends an element to a list column.
    pub fn list_push(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        element: impl Into<Value>,
    ) -> Result<(), NotifyError> {
        let row = self.list_context(table, key, column)?;
        let len = self.list_len(table, row, column);
        self.list_insert(table, key, column, len, element)
    }

    /// Erases the list element at `index`.
    pub fn list_erase(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        index: usize,
    ) -> Result<(), NotifyError> {
        let row = self.list_context(table, key, column)?;
        self.check_list_index(table, row, column, index)?;
        self.select_list(table, column, key, row);
        match self.list_mut(table, row, column)? {
            Value::LinkList(targets) => {
                targets.remove(index);
            }
            Value::Array(values) => {
                values.remove(index);
            }
            _ => {}
        }
        self.log.push(Instruction::ListErase { index });
        Ok(())
    }

    /// Replaces the list element at `index`.
    pub fn list_set(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        index: usize,
        element: impl Into<Value>,
    ) -> Result<(), NotifyError> {
        let row = self.list_context(table, key, column)?;
        let element = self.check_element(table, column, element.into())?;
        self.check_list_index(table, row, column, index)?;
        self.select_list(table, column, key, row);
        match (self.list_mut(table, row, column)?, element) {
            (Value::LinkList(targets), Value::Link(Some(target))) => targets[index] = target,
            (Value::Array(values), element) => values[index] = element,
            _ => {}
        }
        self.log.push(Instruction::ListSet { index });
        Ok(())
    }

    /// Moves the list element at `from` so that it ends at `to`.
    pub fn list_move(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        from: usize,
        to: usize,
    ) -> Result<(), NotifyError> {
        let row = self.list_context(table, key, column)?;
        self.check_list_index(table, row, column, from)?;
        self.check_list_index(table, row, column, to)?;
        if from == to {
            return Ok(());
        }
        self.select_list(table, column, key, row);
        match self.list_mut(table, row, column)? {
            Value::LinkList(targets) => {
                let target = targets.remove(from);
                targets.insert(to, target);
            }
            Value::Array(values) => {
                let value = values.remove(from);
                values.insert(to, value);
            }
            _ => {}
        }
        self.log.push(Instruction::ListMove { from, to });
        Ok(())
    }

    /// Exchanges the list elements at `a` and `b`.
    pub fn list_swap(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        a: usize,
        b: usize,
    ) -> Result<(), NotifyError> {
        let row = self.list_context(table, key, column)?;
        self.check_list_index(table, row, column, a)?;
        self.check_list_index(table, row, column, b)?;
        if a == b {
            return Ok(());
        }
        self.select_list(table, column, key, row);
        match self.list_mut(table, row, column)? {
            Value::LinkList(targets) => targets.swap(a, b),
            Value::Array(values) => values.swap(a, b),
            _ => {}
        }
        self.log.push(Instruction::ListSwap { a, b });
        Ok(())
    }

    /// Removes every element of a list column.
    pub fn list_clear(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
    ) -> Result<(), NotifyError> {
        let row = self.list_context(table, key, column)?;
        let size = self.list_len(table, row, column);
        self.select_list(table, column, key, row);
        match self.list_mut(table, row, column)? {
            Value::LinkList(targets) => targets.clear(),
            Value::Array(values) => values.clear(),
            _ => {}
        }
        self.log.push(Instruction::ListClear { size });
        Ok(())
    }

    /// Publishes the staged state as the next version.
    ///
    /// # Returns
    /// `Result<SnapshotVersion, NotifyError>` containing the committed version.
    pub fn commit(&mut self) -> Result<SnapshotVersion, NotifyError> {
        self.ensure_active()?;
        self.state = TxState::Committed;
        let log = std::mem::take(&mut self.log);
        let result = self.store.publish(self.staged.clone(), log);
        self.store.release_writer();
        result
    }

    /// Discards the staged state.
    pub fn abort(&mut self) {
        if self.is_active() {
            self.state = TxState::Aborted;
            self.log.clear();
            self.store.release_writer();
            debug!("write transaction aborted");
        }
    }

    fn ensure_active(&self) -> Result<(), NotifyError> {
        match self.state {
            TxState::Active => Ok(()),
            _ => Err(NotifyError::TransactionClosed),
        }
    }

    fn table_mut(&mut self, table: TableId) -> Result<&mut TableData, NotifyError> {
        self.staged
            .tables
            .get_mut(&table)
            .map(Arc::make_mut)
            .ok_or(NotifyError::TableNotFound { table })
    }

    fn position(&self, table: TableId, key: RowKey) -> Result<usize, NotifyError> {
        self.staged
            .table(table)?
            .position(key)
            .ok_or(NotifyError::RowNotFound { table, key })
    }

    fn select_table(&mut self, table: TableId) {
        if self.selected_table != Some(table) {
            self.log.push(Instruction::SelectTable(table));
            self.selected_table = Some(table);
            self.selected_list = None;
        }
    }

    /// Row edits may shift the owner of the selected list, so they drop the
    /// list selection.
    fn select_row_context(&mut self, table: TableId) {
        self.select_table(table);
        self.selected_list = None;
    }

    fn select_list(&mut self, table: TableId, column: ColumnId, key: RowKey, row: usize) {
        self.select_table(table);
        if self.selected_list != Some((table, column, key)) {
            self.log.push(Instruction::SelectList { column, row, key });
            self.selected_list = Some((table, column, key));
        }
    }

    fn write(
        &mut self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
        value: Value,
        is_default: bool,
    ) -> Result<(), NotifyError> {
        self.ensure_active()?;
        let schema = self.staged.schema.table(table)?;
        let column_schema = schema
            .column(column)
            .ok_or(NotifyError::ColumnNotFound { table, column })?;
        if column_schema.kind.is_list() || !value.fits(column_schema.kind, column_schema.nullable)
        {
            return Err(NotifyError::TypeMismatch {
                expected: format!("{:?}", column_schema.kind),
                got: value.type_name().to_string(),
            });
        }
        if let (Value::Link(Some(target)), Some(target_table)) =
            (&value, column_schema.kind.link_target())
        {
            self.position(target_table, *target)?;
        }

        let index = self.position(table, key)?;
        if let Some(row) = self.table_mut(table)?.row_at_mut(index) {
            row.values.insert(column, value);
        }
        self.select_row_context(table);
        self.log.push(Instruction::Set {
            index,
            column,
            is_default,
        });
        Ok(())
    }

    /// Nullifies single links to `key` and removes it from every link list.
    fn unlink(&mut self, table: TableId, key: RowKey) -> Result<(), NotifyError> {
        for relation in self.staged.schema.incoming(table) {
            let source = relation.from_table;
            let column = relation.from_column;
            let rows: Vec<(usize, RowKey, Vec<usize>)> = self
                .staged
                .table(source)?
                .rows()
                .iter()
                .enumerate()
                .filter_map(|(position, row)| {
                    let hits: Vec<usize> = match row.values.get(&column) {
                        Some(Value::Link(Some(target))) if *target == key => vec![0],
                        Some(Value::LinkList(targets)) => targets
                            .iter()
                            .enumerate()
                            .filter(|(_, t)| **t == key)
                            .map(|(i, _)| i)
                            .collect(),
                        _ => Vec::new(),
                    };
                    (!hits.is_empty()).then_some((position, row.key, hits))
                })
                .collect();

            for (position, owner, hits) in rows {
                match relation.shape {
                    LinkShape::Single => {
                        if let Some(row) = self.table_mut(source)?.row_at_mut(position) {
                            row.values.insert(column, Value::Link(None));
                        }
                        self.select_row_context(source);
                        self.log.push(Instruction::Set {
                            index: position,
                            column,
                            is_default: false,
                        });
                    }
                    LinkShape::List => {
                        self.select_list(source, column, owner, position);
                        for index in hits.into_iter().rev() {
                            if let Value::LinkList(targets) = self.list_mut(source, position, column)? {
                                targets.remove(index);
                            }
                            self.log.push(Instruction::ListErase { index });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Checks that `column` is a list column and returns the owner's position.
    fn list_context(
        &self,
        table: TableId,
        key: RowKey,
        column: ColumnId,
    ) -> Result<usize, NotifyError> {
        self.ensure_active()?;
        let kind = self
            .staged
            .schema
            .table(table)?
            .column(column)
            .ok_or(NotifyError::ColumnNotFound { table, column })?
            .kind;
        if !kind.is_list() {
            return Err(NotifyError::TypeMismatch {
                expected: "list".to_string(),
                got: format!("{kind:?}"),
            });
        }
        self.position(table, key)
    }

    fn check_element(
        &self,
        table: TableId,
        column: ColumnId,
        element: Value,
    ) -> Result<Value, NotifyError> {
        let kind = self
            .staged
            .schema
            .table(table)?
            .column(column)
            .ok_or(NotifyError::ColumnNotFound { table, column })?
            .kind;
        match (kind, &element) {
            (ColumnKind::LinkList { target }, Value::Link(Some(key))) => {
                self.position(target, *key)?;
                Ok(element)
            }
            (ColumnKind::Array, value) if value.is_primitive() => Ok(element),
            _ => Err(NotifyError::TypeMismatch {
                expected: format!("element of {kind:?}"),
                got: element.type_name().to_string(),
            }),
        }
    }

    fn list_len(&self, table: TableId, row: usize, column: ColumnId) -> usize {
        self.staged
            .table(table)
            .ok()
            .and_then(|t| t.rows().get(row))
            .and_then(|r| r.values.get(&column))
            .map(|v| match v {
                Value::LinkList(targets) => targets.len(),
                Value::Array(values) => values.len(),
                _ => 0,
            })
            .unwrap_or(0)
    }

    fn check_list_index(
        &self,
        table: TableId,
        row: usize,
        column: ColumnId,
        index: usize,
    ) -> Result<(), NotifyError> {
        let len = self.list_len(table, row, column);
        if index >= len {
            return Err(NotifyError::InvalidIndex { table, index, len });
        }
        Ok(())
    }

    fn list_mut(
        &mut self,
        table: TableId,
        row: usize,
        column: ColumnId,
    ) -> Result<&mut Value, NotifyError> {
        self.table_mut(table)?
            .row_at_mut(row)
            .and_then(|r| r.values.get_mut(&column))
            .ok_or(NotifyError::ColumnNotFound { table, column })
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        self.abort();
    }
}
