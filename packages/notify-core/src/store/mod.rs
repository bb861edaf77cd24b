//! In-memory versioned store used to drive change computation end to end.
//!
//! Every commit publishes a new immutable [`StoreSnapshot`] through an
//! `ArcSwap` head and appends the instructions that produced it to the
//! history. Old versions stay readable until [`MemoryStore::compact`] drops
//! them.

mod snapshot;
mod transaction;
mod value;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use tracing::debug;

use crate::error::NotifyError;
use crate::history::{Instruction, SnapshotView, VersionedSource};
use crate::schema::Schema;
use crate::types::SnapshotVersion;

pub use snapshot::{Row, StoreSnapshot, TableData};
pub use transaction::WriteTransaction;
pub use value::Value;

/// Callback run after every commit with the new version.
pub type CommitHook = Box<dyn Fn(SnapshotVersion) + Send + Sync>;

/// Versioned in-memory store with a single writer.
pub struct MemoryStore {
    /// Latest committed snapshot
    head: ArcSwap<StoreSnapshot>,
    /// Retained snapshots by version
    versions: RwLock<BTreeMap<SnapshotVersion, Arc<StoreSnapshot>>>,
    /// Instructions that produced each version from its predecessor
    history: RwLock<BTreeMap<SnapshotVersion, Arc<Vec<Instruction>>>>,
    /// Whether a write transaction is open
    writer: AtomicBool,
    hooks: RwLock<Vec<CommitHook>>,
}

impl MemoryStore {
    /// Creates a store with empty tables for `schema` at version 0.
    pub fn new(schema: Schema) -> Self {
        let initial = Arc::new(StoreSnapshot::initial(schema));
        let mut versions = BTreeMap::new();
        versions.insert(initial.version, Arc::clone(&initial));
        Self {
            head: ArcSwap::new(initial),
            versions: RwLock::new(versions),
            history: RwLock::new(BTreeMap::new()),
            writer: AtomicBool::new(false),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Returns the latest committed snapshot.
    pub fn head(&self) -> Arc<StoreSnapshot> {
        self.head.load_full()
    }

    /// Returns the snapshot pinned at `version`.
    pub fn snapshot_at(&self, version: SnapshotVersion) -> Result<Arc<StoreSnapshot>, NotifyError> {
        let versions = self.versions.read().map_err(|_| NotifyError::LockPoisoned)?;
        versions
            .get(&version)
            .cloned()
            .ok_or(NotifyError::VersionUnavailable { version })
    }

    /// Opens the write transaction.
    ///
    /// # Returns
    /// `Result<WriteTransaction, NotifyError>`; `WriteInProgress` if another
    /// transaction is open.
    pub fn begin_write(&self) -> Result<WriteTransaction<'_>, NotifyError> {
        self.writer
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| NotifyError::WriteInProgress)?;
        let base = StoreSnapshot::clone(&self.head.load());
        Ok(WriteTransaction::new(self, base))
    }

    /// Runs `f` in a write transaction and commits it.
    ///
    /// The transaction is aborted if `f` fails.
    pub fn write<F>(&self, f: F) -> Result<SnapshotVersion, NotifyError>
    where
        F: FnOnce(&mut WriteTransaction<'_>) -> Result<(), NotifyError>,
    {
        let mut tx = self.begin_write()?;
        f(&mut tx)?;
        tx.commit()
    }

    /// Registers a callback run after every commit.
    pub fn on_commit(&self, hook: CommitHook) -> Result<(), NotifyError> {
        self.hooks
            .write()
            .map_err(|_| NotifyError::LockPoisoned)?
            .push(hook);
        Ok(())
    }

    /// Drops every retained version older than `before`, keeping the head.
    ///
    /// # Returns
    /// `Result<usize, NotifyError>` containing the number of versions dropped.
    pub fn compact(&self, before: SnapshotVersion) -> Result<usize, NotifyError> {
        let before = before.min(self.head.load().version);
        let mut versions = self.versions.write().map_err(|_| NotifyError::LockPoisoned)?;
        let mut history = self.history.write().map_err(|_| NotifyError::LockPoisoned)?;
        let kept = versions.split_off(&before);
        let dropped = versions.len();
        *versions = kept;
        // The log entry of `before` leads from a dropped version, so it goes too.
        *history = history.split_off(&before.next());
        debug!(%before, dropped, "compacted store history");
        Ok(dropped)
    }

    fn publish(
        &self,
        mut staged: StoreSnapshot,
        log: Vec<Instruction>,
    ) -> Result<SnapshotVersion, NotifyError> {
        let version = self.head.load().version.next();
        staged.version = version;
        let snapshot = Arc::new(staged);
        {
            let mut versions = self.versions.write().map_err(|_| NotifyError::LockPoisoned)?;
            let mut history = self.history.write().map_err(|_| NotifyError::LockPoisoned)?;
            debug!(%version, instructions = log.len(), "committing");
            history.insert(version, Arc::new(log));
            versions.insert(version, Arc::clone(&snapshot));
            self.head.store(snapshot);
        }

        let hooks = self.hooks.read().map_err(|_| NotifyError::LockPoisoned)?;
        for hook in hooks.iter() {
            hook(version);
        }
        Ok(version)
    }

    fn release_writer(&self) {
        self.writer.store(false, Ordering::Release);
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("version", &self.head.load().version)
            .field("retained", &self.versions.read().map(|v| v.len()).ok())
            .field("writing", &self.writer.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl VersionedSource for MemoryStore {
    fn latest_version(&self) -> SnapshotVersion {
        self.head.load().version
    }

    fn snapshot(&self, version: SnapshotVersion) -> Result<Arc<dyn SnapshotView>, NotifyError> {
        Ok(self.snapshot_at(version)?)
    }

    fn history(
        &self,
        from: SnapshotVersion,
        to: SnapshotVersion,
    ) -> Result<Vec<Instruction>, NotifyError> {
        if from > to {
            return Err(NotifyError::InvalidVersionRange { from, to });
        }
        let versions = self.versions.read().map_err(|_| NotifyError::LockPoisoned)?;
        if !versions.contains_key(&from) {
            return Err(NotifyError::VersionUnavailable { version: from });
        }
        drop(versions);

        let history = self.history.read().map_err(|_| NotifyError::LockPoisoned)?;
        let mut instructions = Vec::new();
        let mut version = from;
        while version < to {
            version = version.next();
            let log = history
                .get(&version)
                .ok_or(NotifyError::VersionUnavailable { version })?;
            instructions.extend(log.iter().cloned());
        }
        Ok(instructions)
    }
}
