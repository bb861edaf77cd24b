//! Error types for change computation and the reference store.

use thiserror::Error;

use crate::types::{ColumnId, RowKey, SnapshotVersion, TableId};

/// Errors surfaced by change computation, snapshot access and the reference store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The history between two versions removes or changes a column a reader relies on
    #[error("Schema mismatch on table {table} column {column}: {reason}")]
    SchemaMismatch {
        table: TableId,
        column: ColumnId,
        reason: String,
    },

    /// Snapshot or history for this version is no longer retained
    #[error("Version {version} is not available")]
    VersionUnavailable { version: SnapshotVersion },

    /// Requested version range runs backwards
    #[error("Invalid version range {from}..{to}")]
    InvalidVersionRange {
        from: SnapshotVersion,
        to: SnapshotVersion,
    },

    /// Table not found
    #[error("Table {table} not found")]
    TableNotFound { table: TableId },

    /// Column not found in table
    #[error("Column {column} not found in table {table}")]
    ColumnNotFound { table: TableId, column: ColumnId },

    /// Row index out of bounds
    #[error("Index {index} out of bounds for table {table} (len: {len})")]
    InvalidIndex {
        table: TableId,
        index: usize,
        len: usize,
    },

    /// Row key not present
    #[error("Row {key} not found in table {table}")]
    RowNotFound { table: TableId, key: RowKey },

    /// Value does not fit the column
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    /// Another write transaction is open
    #[error("A write transaction is already in progress")]
    WriteInProgress,

    /// Write transaction was already committed or aborted
    #[error("Transaction already closed")]
    TransactionClosed,

    /// Derived view evaluation failed
    #[error("Query evaluation failed: {0}")]
    Query(String),

    /// Lock poisoned (RwLock poisoned)
    #[error("Lock poisoned")]
    LockPoisoned,

    /// Reader was closed
    #[error("Reader closed")]
    ReaderClosed,

    /// Debug dump could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Background worker is not running
    #[error("Notification worker unavailable: {0}")]
    WorkerUnavailable(String),
}
