//! Storage seams: pinned snapshot views and the instruction history between versions.

mod instruction;

use std::sync::Arc;

use crate::error::NotifyError;
use crate::schema::Schema;
use crate::types::{ColumnId, RowKey, SnapshotVersion, TableId};

pub use instruction::Instruction;

/// Read-only view of the store pinned at one version.
pub trait SnapshotView: Send + Sync {
    /// Version this view is pinned to.
    fn version(&self) -> SnapshotVersion;

    /// Schema at this version.
    fn schema(&self) -> &Schema;

    /// Number of rows in `table`, or `None` if the table does not exist.
    fn row_count(&self, table: TableId) -> Option<usize>;

    /// Position of the row with `key`.
    fn row_position(&self, table: TableId, key: RowKey) -> Option<usize>;

    /// Key of the row at `position`.
    fn row_key(&self, table: TableId, position: usize) -> Option<RowKey>;

    /// Target of a single link column, `None` when null or missing.
    fn link(&self, table: TableId, key: RowKey, column: ColumnId) -> Option<RowKey>;

    /// Targets of a link list column, `None` when the owner is missing.
    fn link_list(&self, table: TableId, key: RowKey, column: ColumnId) -> Option<Vec<RowKey>>;

    /// Length of a list column (links or values), `None` when the owner is missing.
    fn list_len(&self, table: TableId, key: RowKey, column: ColumnId) -> Option<usize>;

    /// Keys of every row of `table` in table order.
    fn row_keys(&self, table: TableId) -> Vec<RowKey> {
        let count = self.row_count(table).unwrap_or(0);
        (0..count).filter_map(|i| self.row_key(table, i)).collect()
    }
}

/// Versioned storage: latest version, pinned snapshots and history.
pub trait VersionedSource: Send + Sync {
    /// Latest committed version.
    fn latest_version(&self) -> SnapshotVersion;

    /// Opens a read view pinned at `version`.
    fn snapshot(&self, version: SnapshotVersion) -> Result<Arc<dyn SnapshotView>, NotifyError>;

    /// Ordered instructions transforming `from` into `to`.
    fn history(
        &self,
        from: SnapshotVersion,
        to: SnapshotVersion,
    ) -> Result<Vec<Instruction>, NotifyError>;
}
