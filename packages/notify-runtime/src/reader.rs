//! Readers: execution contexts pinned to one version that own observers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use notify_core::schema::ColumnSchema;
use notify_core::{
    CollectionChangeSet, CollectionId, ColumnId, Instruction, NotifyError, SnapshotVersion,
    TableId,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::registry::RegistrationId;
use crate::scheduler::{NotificationScheduler, ReaderId};
use crate::Result;

/// Hooks around a reader's delivery cycle. All default to no-ops.
pub trait BindingContext: Send {
    /// Called before the first callback of a delivery cycle.
    fn will_send_notifications(&mut self) {}

    /// Called after the last callback of a delivery cycle, unless the reader
    /// was closed by one of the callbacks.
    fn did_send_notifications(&mut self) {}

    /// Called when the reader moves to a new version.
    fn did_change(&mut self, _from: SnapshotVersion, _to: SnapshotVersion) {}
}

struct ReaderState {
    version: SnapshotVersion,
    closed: bool,
    /// Columns whose shape this reader depends on, as of its version
    relied: BTreeMap<(TableId, ColumnId), ColumnSchema>,
}

struct ReaderInner {
    id: ReaderId,
    scheduler: Arc<NotificationScheduler>,
    state: Mutex<ReaderState>,
    context: Mutex<Option<Box<dyn BindingContext>>>,
    delivering: AtomicBool,
}

/// A reader pinned to one version of the scheduler's source.
///
/// Changes reach its observers only when it advances or delivers, on the
/// calling thread. Dropping the reader closes it.
pub struct Reader {
    inner: Arc<ReaderInner>,
}

/// Weak handle to a [`Reader`], for use inside callbacks.
#[derive(Clone)]
pub struct ReaderHandle {
    inner: Weak<ReaderInner>,
}

/// Keeps an observer registered. Dropping it unregisters the observer.
pub struct NotificationToken {
    scheduler: Weak<NotificationScheduler>,
    id: RegistrationId,
}

impl Reader {
    /// Opens a reader at the source's latest version.
    pub fn open(scheduler: Arc<NotificationScheduler>) -> Self {
        let version = scheduler.source().latest_version();
        Self::pinned(scheduler, version)
    }

    /// Opens a reader at `version`.
    ///
    /// # Returns
    /// The reader, or `VersionUnavailable` if the version is not retained.
    pub fn open_at(scheduler: Arc<NotificationScheduler>, version: SnapshotVersion) -> Result<Self> {
        scheduler.source().snapshot(version)?;
        Ok(Self::pinned(scheduler, version))
    }

    fn pinned(scheduler: Arc<NotificationScheduler>, version: SnapshotVersion) -> Self {
        let id = scheduler.next_reader_id();
        debug!(reader = %id, %version, "opened reader");
        Self {
            inner: Arc::new(ReaderInner {
                id,
                scheduler,
                state: Mutex::new(ReaderState {
                    version,
                    closed: false,
                    relied: BTreeMap::new(),
                }),
                context: Mutex::new(None),
                delivering: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ReaderId {
        self.inner.id
    }

    /// Version the reader is pinned at.
    pub fn version(&self) -> SnapshotVersion {
        self.inner.state.lock().version
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn handle(&self) -> ReaderHandle {
        ReaderHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Installs the delivery hooks, replacing any previous ones.
    pub fn set_binding_context(&self, context: Box<dyn BindingContext>) {
        *self.inner.context.lock() = Some(context);
    }

    /// Registers `callback` for changes to `collection`.
    ///
    /// The first delivery describes the collection at the reader's current
    /// version as entirely inserted.
    pub fn observe<F>(&self, collection: CollectionId, callback: F) -> Result<NotificationToken>
    where
        F: FnMut(&CollectionChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        self.inner.observe(collection, Box::new(callback))
    }

    /// Declares that this reader depends on the current shape of a column.
    ///
    /// Advancing past a version that removes, retypes or makes the column
    /// nullable fails with `SchemaMismatch`.
    pub fn rely_on(&self, table: TableId, column: ColumnId) -> Result<()> {
        self.inner.rely_on(table, column)
    }

    /// Advances to the source's latest version and delivers.
    pub fn advance(&self) -> Result<SnapshotVersion> {
        let latest = self.inner.scheduler.source().latest_version();
        self.inner.advance_to(latest)
    }

    /// Advances to `target` and delivers.
    ///
    /// # Returns
    /// The new version. On error the reader stays where it was.
    pub fn advance_to(&self, target: SnapshotVersion) -> Result<SnapshotVersion> {
        self.inner.advance_to(target)
    }

    /// Delivers changes already computed up to the pinned version.
    ///
    /// # Returns
    /// The number of callbacks invoked.
    pub fn deliver(&self) -> Result<usize> {
        self.inner.deliver()
    }

    /// Unregisters every observer of this reader.
    pub fn close(&self) {
        self.inner.close()
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl ReaderHandle {
    fn upgrade(&self) -> Result<Arc<ReaderInner>> {
        self.inner.upgrade().ok_or(NotifyError::ReaderClosed)
    }

    pub fn observe<F>(&self, collection: CollectionId, callback: F) -> Result<NotificationToken>
    where
        F: FnMut(&CollectionChangeSet, Option<&NotifyError>) + Send + 'static,
    {
        self.upgrade()?.observe(collection, Box::new(callback))
    }

    pub fn version(&self) -> Result<SnapshotVersion> {
        self.upgrade()?.live_version()
    }

    pub fn is_closed(&self) -> bool {
        self.upgrade().map_or(true, |inner| inner.is_closed())
    }

    pub fn close(&self) {
        if let Ok(inner) = self.upgrade() {
            inner.close();
        }
    }
}

impl ReaderInner {
    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn live_version(&self) -> Result<SnapshotVersion> {
        let state = self.state.lock();
        if state.closed {
            return Err(NotifyError::ReaderClosed);
        }
        Ok(state.version)
    }

    fn observe(
        &self,
        collection: CollectionId,
        callback: crate::NotificationCallback,
    ) -> Result<NotificationToken> {
        let version = self.live_version()?;
        let id = self
            .scheduler
            .register(self.id, version, collection, callback)?;
        let token = NotificationToken {
            scheduler: Arc::downgrade(&self.scheduler),
            id,
        };
        if self.is_closed() {
            // Closed while registering; the token unregisters on drop.
            return Err(NotifyError::ReaderClosed);
        }
        Ok(token)
    }

    fn rely_on(&self, table: TableId, column: ColumnId) -> Result<()> {
        let version = self.live_version()?;
        let view = self.scheduler.source().snapshot(version)?;
        let schema = view
            .schema()
            .table(table)?
            .column(column)
            .cloned()
            .ok_or(NotifyError::ColumnNotFound { table, column })?;
        self.state.lock().relied.insert((table, column), schema);
        Ok(())
    }

    fn advance_to(&self, target: SnapshotVersion) -> Result<SnapshotVersion> {
        let from = self.live_version()?;
        if target < from {
            return Err(NotifyError::InvalidVersionRange { from, to: target });
        }
        if target > from {
            if let Err(e) = self.validate_schema(from, target) {
                warn!(reader = %self.id, %from, to = %target, error = %e, "refusing to advance");
                return Err(e);
            }
            self.scheduler.run_to(target)?;
            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(NotifyError::ReaderClosed);
                }
                state.version = target;
            }
            self.with_context(|context| context.did_change(from, target));
            debug!(reader = %self.id, %from, to = %target, "reader advanced");
        }
        self.deliver()?;
        Ok(target)
    }

    /// Checks the history between two versions for changes to relied-upon
    /// columns.
    fn validate_schema(&self, from: SnapshotVersion, to: SnapshotVersion) -> Result<()> {
        let relied = self.state.lock().relied.clone();
        if relied.is_empty() {
            return Ok(());
        }
        let history = self.scheduler.source().history(from, to)?;
        let mut table = None;
        for instruction in &history {
            let (column, reason) = match instruction {
                Instruction::SelectTable(selected) => {
                    table = Some(*selected);
                    continue;
                }
                Instruction::RemoveColumn { column } => (*column, "column removed".to_string()),
                Instruction::ChangeColumn {
                    column,
                    kind,
                    nullable,
                } => {
                    let Some(expected) = table.and_then(|t| relied.get(&(t, *column))) else {
                        continue;
                    };
                    if *kind != expected.kind {
                        (*column, format!("column retyped to {kind:?}"))
                    } else if *nullable && !expected.nullable {
                        (*column, "column made optional".to_string())
                    } else {
                        continue;
                    }
                }
                _ => continue,
            };
            let Some(table) = table else {
                continue;
            };
            if relied.contains_key(&(table, column)) {
                return Err(NotifyError::SchemaMismatch {
                    table,
                    column,
                    reason,
                });
            }
        }
        Ok(())
    }

    fn deliver(&self) -> Result<usize> {
        let version = self.live_version()?;
        // A callback advancing its own reader does not start a nested cycle.
        if self.delivering.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        self.scheduler.prepare_initial(Some(self.id));
        let mut invoked = 0;
        if self.scheduler.has_deliverable(self.id, version) {
            self.with_context(|context| context.will_send_notifications());
            invoked = self.scheduler.deliver(self.id, version);
            if !self.is_closed() {
                self.with_context(|context| context.did_send_notifications());
            }
        }
        self.delivering.store(false, Ordering::Release);
        Ok(invoked)
    }

    fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.scheduler.unregister_reader(self.id);
        debug!(reader = %self.id, "closed reader");
    }

    /// Runs `f` on the binding context without holding its lock.
    fn with_context<F>(&self, f: F)
    where
        F: FnOnce(&mut dyn BindingContext),
    {
        let taken = self.context.lock().take();
        if let Some(mut context) = taken {
            f(context.as_mut());
            let mut slot = self.context.lock();
            if slot.is_none() {
                *slot = Some(context);
            }
        }
    }
}

impl NotificationToken {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Returns `true` while the observer is registered.
    pub fn is_registered(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|scheduler| scheduler.registration_state(self.id).is_some())
    }

    /// Makes the next change delivery advance without calling back.
    pub fn suppress_next(&self) -> bool {
        self.scheduler
            .upgrade()
            .is_some_and(|scheduler| scheduler.suppress_next(self.id))
    }

    /// Unregisters the observer now.
    pub fn unregister(self) {}
}

impl Drop for NotificationToken {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.unregister(self.id);
        }
    }
}
