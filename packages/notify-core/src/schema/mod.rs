//! Static schema metadata: tables, columns and the links between them.

mod relation;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;
use crate::types::{ColumnId, TableId};

pub use relation::{LinkShape, Relation, RelatedTables};

/// Column storage kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Int,
    Bool,
    Text,
    /// Single link to a row of `target`
    Link { target: TableId },
    /// Ordered list of links to rows of `target`
    LinkList { target: TableId },
    /// Ordered list of primitive values
    Array,
}

impl ColumnKind {
    /// Returns `true` for column kinds holding an ordered list.
    pub fn is_list(&self) -> bool {
        matches!(self, ColumnKind::LinkList { .. } | ColumnKind::Array)
    }

    /// Returns the link target table, if this is a link column.
    pub fn link_target(&self) -> Option<TableId> {
        match self {
            ColumnKind::Link { target } | ColumnKind::LinkList { target } => Some(*target),
            _ => None,
        }
    }
}

/// Column definition within a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// Column identifier
    pub id: ColumnId,
    /// Column name
    pub name: String,
    /// Storage kind
    pub kind: ColumnKind,
    /// Whether the column accepts null
    pub nullable: bool,
}

impl ColumnSchema {
    /// Creates a non-nullable column.
    pub fn new(id: ColumnId, name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    /// Marks the column nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table identifier
    pub id: TableId,
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    /// Creates a table definition.
    pub fn new(id: TableId, name: impl Into<String>, columns: Vec<ColumnSchema>) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
        }
    }

    /// Looks up a column by id.
    pub fn column(&self, column: ColumnId) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.id == column)
    }

    /// Returns the position of a column in declaration order.
    pub fn column_index(&self, column: ColumnId) -> Result<usize, NotifyError> {
        self.columns
            .iter()
            .position(|c| c.id == column)
            .ok_or(NotifyError::ColumnNotFound {
                table: self.id,
                column,
            })
    }

    /// Returns the outgoing link relations of this table.
    pub fn relations(&self) -> impl Iterator<Item = Relation> + '_ {
        self.columns.iter().filter_map(move |c| match c.kind {
            ColumnKind::Link { target } => Some(Relation {
                from_table: self.id,
                from_column: c.id,
                to_table: target,
                shape: LinkShape::Single,
            }),
            ColumnKind::LinkList { target } => Some(Relation {
                from_table: self.id,
                from_column: c.id,
                to_table: target,
                shape: LinkShape::List,
            }),
            _ => None,
        })
    }
}

/// Schema of a whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    tables: BTreeMap<TableId, TableSchema>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a schema from table definitions.
    pub fn with_tables(tables: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.id, t)).collect(),
        }
    }

    /// Looks up a table.
    pub fn table(&self, table: TableId) -> Result<&TableSchema, NotifyError> {
        self.tables
            .get(&table)
            .ok_or(NotifyError::TableNotFound { table })
    }

    /// Looks up a table for modification.
    pub fn table_mut(&mut self, table: TableId) -> Result<&mut TableSchema, NotifyError> {
        self.tables
            .get_mut(&table)
            .ok_or(NotifyError::TableNotFound { table })
    }

    /// Adds or replaces a table definition.
    pub fn insert_table(&mut self, table: TableSchema) {
        self.tables.insert(table.id, table);
    }

    /// Iterates over all tables.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Returns every relation whose target is `table`.
    pub fn incoming(&self, table: TableId) -> Vec<Relation> {
        self.tables
            .values()
            .flat_map(|t| t.relations())
            .filter(|r| r.to_table == table)
            .collect()
    }

    /// Returns the tables reachable from `root` through links, `root` included.
    pub fn related_tables(&self, root: TableId) -> RelatedTables {
        RelatedTables::find(self, root)
    }
}
