//! Change-set computation for a versioned multi-reader object store.
//!
//! Turns the instruction history between two committed versions into
//! per-collection change sets: insertions, deletions, modifications and moves
//! for tables, lists and derived views, per-column dirty tracking for single
//! objects, and transitive change detection through links.

pub mod builder;
pub mod changeset;
pub mod config;
pub mod deep_change;
pub mod error;
pub mod history;
pub mod index_set;
pub mod schema;
pub mod store;
pub mod tracker;
pub mod types;

pub use builder::{diff, CollectionChangeBuilder, CollectionId, ResultsQuery};
pub use changeset::{CollectionChangeSet, Move};
pub use config::NotifierConfig;
pub use deep_change::DeepChangeChecker;
pub use error::NotifyError;
pub use history::{Instruction, SnapshotView, VersionedSource};
pub use index_set::IndexSet;
pub use types::{ColumnId, RowKey, SnapshotVersion, TableId};
