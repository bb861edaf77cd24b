//! Replays instruction history into per-table and per-list change records.

mod replay;
mod table_change;

pub use replay::{replay, Interest, ListChangeInfo, ListInterest, ListKey, TransactionChangeInfo};
pub use table_change::{TableChangeInfo, TableChangeTracker};
