//! Cell values held by the reference store.

use serde::{Deserialize, Serialize};

use crate::schema::ColumnKind;
use crate::types::RowKey;

/// Value of one column of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Int(i64),
    Bool(bool),
    Text(String),
    /// Single link, `None` when unset
    Link(Option<RowKey>),
    /// Ordered link targets
    LinkList(Vec<RowKey>),
    /// Ordered primitive values
    Array(Vec<Value>),
}

impl Value {
    /// Value a new row gets for a column of `kind`.
    pub fn default_for(kind: ColumnKind, nullable: bool) -> Self {
        match kind {
            ColumnKind::LinkList { .. } => Value::LinkList(Vec::new()),
            ColumnKind::Array => Value::Array(Vec::new()),
            ColumnKind::Link { .. } => Value::Link(None),
            _ if nullable => Value::Null,
            ColumnKind::Int => Value::Int(0),
            ColumnKind::Bool => Value::Bool(false),
            ColumnKind::Text => Value::Text(String::new()),
        }
    }

    /// Returns the name of the value's type for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Text(_) => "text",
            Value::Link(_) => "link",
            Value::LinkList(_) => "link list",
            Value::Array(_) => "array",
        }
    }

    /// Returns `true` if the value can be stored in a column of `kind`.
    pub fn fits(&self, kind: ColumnKind, nullable: bool) -> bool {
        matches!(
            (self, kind),
            (Value::Null, ColumnKind::Int | ColumnKind::Bool | ColumnKind::Text)
                if nullable
        ) || matches!(
            (self, kind),
            (Value::Int(_), ColumnKind::Int)
                | (Value::Bool(_), ColumnKind::Bool)
                | (Value::Text(_), ColumnKind::Text)
                | (Value::Link(_), ColumnKind::Link { .. })
                | (Value::LinkList(_), ColumnKind::LinkList { .. })
                | (Value::Array(_), ColumnKind::Array)
        )
    }

    /// Returns `true` for values that may be elements of an array column.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null | Value::Int(_) | Value::Bool(_) | Value::Text(_)
        )
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<RowKey> {
        match self {
            Value::Link(target) => *target,
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<RowKey> for Value {
    fn from(v: RowKey) -> Self {
        Value::Link(Some(v))
    }
}
