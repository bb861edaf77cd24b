//! Notification scheduling: grouping, shared computation and ordered delivery.
//!
//! Registrations are grouped by the version their changes were last computed
//! through and the set of tables they depend on. Each group is replayed once
//! per version pair; the replay is cached in a `OnceLock` cell so concurrent
//! requests share it. Results are queued per registration in commit order and
//! handed to callbacks only through [`NotificationScheduler::deliver`], never
//! past the version the owning reader is pinned at.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use notify_core::builder::{collection_changes, CollectionKey};
use notify_core::tracker::{replay, Interest, ListKey, TransactionChangeInfo};
use notify_core::{
    CollectionChangeSet, CollectionId, DeepChangeChecker, NotifierConfig, NotifyError,
    SnapshotVersion, SnapshotView, TableId, VersionedSource,
};
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::registry::{RegistrationId, SlotRegistry};
use crate::Result;

/// Observer callback: the change set, or an empty set and the error that
/// stopped computation.
pub type NotificationCallback =
    Box<dyn FnMut(&CollectionChangeSet, Option<&NotifyError>) + Send>;

/// Identity of a reader within one scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderId(u64);

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader-{}", self.0)
    }
}

/// Lifecycle of a registration. An unregistered id has no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Waiting for its initial change set
    Pending,
    /// Its callback is running
    Delivering,
    /// Has a baseline and is not running
    Idle,
}

/// Work counters, for monitoring and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// History replays performed, one per group and version pair
    pub replays: usize,
    /// Collection change sets computed
    pub changesets: usize,
    /// Callbacks invoked
    pub callbacks: usize,
}

#[derive(Debug, Default)]
struct Counters {
    replays: AtomicUsize,
    changesets: AtomicUsize,
    callbacks: AtomicUsize,
}

struct PendingDelivery {
    end: SnapshotVersion,
    changes: CollectionChangeSet,
    error: Option<NotifyError>,
}

struct Registration {
    reader: ReaderId,
    collection: CollectionId,
    tables: BTreeSet<TableId>,
    registered_at: SnapshotVersion,
    /// Version changes have been computed through; `None` until the initial
    /// change set exists
    computed: Option<SnapshotVersion>,
    pending: VecDeque<PendingDelivery>,
    skip_next: bool,
    /// Taken out while the callback runs
    callback: Option<NotificationCallback>,
    failed: bool,
}

impl Registration {
    fn push(
        &mut self,
        end: SnapshotVersion,
        result: Result<CollectionChangeSet>,
        initial: bool,
    ) {
        self.computed = Some(end);
        let (changes, error) = match result {
            Ok(changes) => (changes, None),
            Err(e) => {
                self.failed = true;
                (CollectionChangeSet::default(), Some(e))
            }
        };
        if !initial && error.is_none() {
            // The flag covers the next computed range, empty or not.
            if std::mem::take(&mut self.skip_next) {
                trace!(%end, "suppressed change set");
                return;
            }
            // Empty change sets are only worth a callback the first time.
            if changes.is_empty() {
                return;
            }
        }
        self.pending.push_back(PendingDelivery {
            end,
            changes,
            error,
        });
    }

    fn ready(&self, version: SnapshotVersion) -> bool {
        self.pending.front().is_some_and(|p| p.end <= version)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey {
    start: SnapshotVersion,
    end: SnapshotVersion,
    tables: BTreeSet<TableId>,
    lists: BTreeSet<ListKey>,
}

struct GroupReplay {
    info: TransactionChangeInfo,
    start: Arc<dyn SnapshotView>,
    end: Arc<dyn SnapshotView>,
    results: Mutex<HashMap<CollectionKey, Result<CollectionChangeSet>>>,
}

type GroupCell = Arc<OnceLock<Result<GroupReplay>>>;

struct GroupJob {
    key: GroupKey,
    cell: GroupCell,
    members: Vec<(RegistrationId, CollectionId)>,
}

#[derive(Default)]
struct SchedulerState {
    registrations: SlotRegistry<Registration>,
    groups: HashMap<GroupKey, GroupCell>,
    group_order: VecDeque<GroupKey>,
}

impl SchedulerState {
    /// Returns the shared cell for `key`, evicting the oldest groups past
    /// `capacity`.
    fn cell(&mut self, key: &GroupKey, capacity: usize) -> GroupCell {
        if let Some(cell) = self.groups.get(key) {
            return Arc::clone(cell);
        }
        let cell = GroupCell::default();
        self.groups.insert(key.clone(), Arc::clone(&cell));
        self.group_order.push_back(key.clone());
        while self.group_order.len() > capacity.max(1) {
            if let Some(old) = self.group_order.pop_front() {
                self.groups.remove(&old);
            }
        }
        cell
    }
}

/// Computes and delivers change notifications for one versioned source.
pub struct NotificationScheduler {
    source: Arc<dyn VersionedSource>,
    config: NotifierConfig,
    state: Mutex<SchedulerState>,
    next_reader: AtomicU64,
    counters: Counters,
}

impl NotificationScheduler {
    /// Creates a scheduler over `source`.
    pub fn new(source: Arc<dyn VersionedSource>, config: NotifierConfig) -> Self {
        Self {
            source,
            config,
            state: Mutex::new(SchedulerState::default()),
            next_reader: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    /// Returns the storage changes are computed from.
    pub fn source(&self) -> &Arc<dyn VersionedSource> {
        &self.source
    }

    /// Returns the depth budget, deep change switch and worker settings.
    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    pub(crate) fn next_reader_id(&self) -> ReaderId {
        ReaderId(self.next_reader.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers an observer owned by `reader`.
    ///
    /// # Arguments
    /// * `reader` - Owning reader; delivery happens only through it
    /// * `version` - Version the reader is pinned at
    /// * `collection` - Observed collection
    /// * `callback` - Receives each change set
    ///
    /// # Returns
    /// The registration id, or an error if `version` cannot be opened.
    pub fn register(
        &self,
        reader: ReaderId,
        version: SnapshotVersion,
        collection: CollectionId,
        callback: NotificationCallback,
    ) -> Result<RegistrationId> {
        let view = self.source.snapshot(version)?;
        let tables = collection.tables_of_interest(view.schema());
        debug!(%reader, %collection, %version, "registering observer");
        let registration = Registration {
            reader,
            collection,
            tables,
            registered_at: version,
            computed: None,
            pending: VecDeque::new(),
            skip_next: false,
            callback: Some(callback),
            failed: false,
        };
        Ok(self.state.lock().registrations.insert(registration))
    }

    /// Removes a registration. No callback runs for it afterwards.
    ///
    /// # Returns
    /// `true` if the registration existed.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let removed = self.state.lock().registrations.remove(id);
        // Dropped here, after the lock, since callbacks may own tokens.
        removed.is_some()
    }

    /// Removes every registration owned by `reader`.
    pub fn unregister_reader(&self, reader: ReaderId) -> usize {
        let removed = self
            .state
            .lock()
            .registrations
            .drain_where(|r| r.reader == reader);
        debug!(%reader, count = removed.len(), "unregistered reader");
        removed.len()
    }

    /// Makes the next computed change of `id` advance its baseline without a
    /// callback, whether or not that change is empty.
    ///
    /// # Returns
    /// `true` if the registration exists.
    pub fn suppress_next(&self, id: RegistrationId) -> bool {
        match self.state.lock().registrations.get_mut(id) {
            Some(registration) => {
                registration.skip_next = true;
                true
            }
            None => false,
        }
    }

    /// Reports where `id` is in its lifecycle.
    ///
    /// # Returns
    /// `None` once the registration has been removed or retired.
    pub fn registration_state(&self, id: RegistrationId) -> Option<RegistrationState> {
        let state = self.state.lock();
        let registration = state.registrations.get(id)?;
        Some(if registration.callback.is_none() {
            RegistrationState::Delivering
        } else if registration.computed.is_none() {
            RegistrationState::Pending
        } else {
            RegistrationState::Idle
        })
    }

    /// Number of live registrations across all readers.
    pub fn registration_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// Snapshot of the replay, change set and callback counters.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            replays: self.counters.replays.load(Ordering::Relaxed),
            changesets: self.counters.changesets.load(Ordering::Relaxed),
            callbacks: self.counters.callbacks.load(Ordering::Relaxed),
        }
    }

    /// Computes the initial change set of registrations that have none,
    /// at the version each was registered at.
    ///
    /// # Arguments
    /// * `reader` - Limit to one reader's registrations, or all when `None`
    pub fn prepare_initial(&self, reader: Option<ReaderId>) {
        let jobs: Vec<(RegistrationId, CollectionId, SnapshotVersion)> = self
            .state
            .lock()
            .registrations
            .iter()
            .filter(|(_, r)| r.computed.is_none() && !r.failed)
            .filter(|(_, r)| reader.map_or(true, |reader| r.reader == reader))
            .map(|(id, r)| (id, r.collection.clone(), r.registered_at))
            .collect();

        for (id, collection, version) in jobs {
            let result = self
                .source
                .snapshot(version)
                .and_then(|view| collection.initial(view.as_ref()));
            let mut state = self.state.lock();
            if let Some(registration) = state.registrations.get_mut(id) {
                if registration.computed.is_none() {
                    trace!(%id, %version, "initial change set ready");
                    registration.push(version, result, true);
                }
            }
        }
    }

    /// Computes pending changes of every registration up to `target`.
    ///
    /// Each group of registrations sharing a start version and table set is
    /// replayed once; collections shared within a group are diffed once.
    pub fn run_to(&self, target: SnapshotVersion) -> Result<()> {
        let latest = self.source.latest_version();
        if target > latest {
            return Err(NotifyError::VersionUnavailable { version: target });
        }
        self.prepare_initial(None);

        let jobs = self.collect_groups(target);
        if jobs.is_empty() {
            return Ok(());
        }
        debug!(%target, groups = jobs.len(), "computing notification groups");

        #[cfg(feature = "parallel")]
        let outcomes: Vec<_> = {
            use rayon::prelude::*;
            jobs.into_par_iter()
                .map(|job| self.compute_group(job))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let outcomes: Vec<_> = jobs
            .into_iter()
            .map(|job| self.compute_group(job))
            .collect();

        let mut state = self.state.lock();
        for (start, results) in outcomes {
            for (id, result) in results {
                let Some(registration) = state.registrations.get_mut(id) else {
                    continue;
                };
                // Another run may have advanced it meanwhile.
                if registration.computed != Some(start) || registration.failed {
                    continue;
                }
                registration.push(target, result, false);
            }
        }
        Ok(())
    }

    fn collect_groups(&self, target: SnapshotVersion) -> Vec<GroupJob> {
        let mut state = self.state.lock();
        let mut grouped: BTreeMap<(SnapshotVersion, BTreeSet<TableId>), Vec<_>> =
            BTreeMap::new();
        for (id, registration) in state.registrations.iter() {
            let Some(start) = registration.computed else {
                continue;
            };
            if registration.failed || start >= target {
                continue;
            }
            grouped
                .entry((start, registration.tables.clone()))
                .or_default()
                .push((id, registration.collection.clone()));
        }

        let mut jobs = Vec::with_capacity(grouped.len());
        for ((start, tables), members) in grouped {
            let lists = members
                .iter()
                .filter_map(|(_, collection)| match collection {
                    CollectionId::List(list) => Some(*list),
                    _ => None,
                })
                .collect();
            let key = GroupKey {
                start,
                end: target,
                tables,
                lists,
            };
            let cell = state.cell(&key, self.config.group_cache_capacity);
            jobs.push(GroupJob { key, cell, members });
        }
        jobs
    }

    fn compute_group(
        &self,
        job: GroupJob,
    ) -> (SnapshotVersion, Vec<(RegistrationId, Result<CollectionChangeSet>)>) {
        let outcome = job
            .cell
            .get_or_init(|| self.replay_group(&job.key, &job.members));
        let results = match outcome {
            Ok(replay) => self.group_changes(replay, &job.members),
            Err(e) => {
                warn!(start = %job.key.start, end = %job.key.end, error = %e, "group replay failed");
                job.members
                    .iter()
                    .map(|(id, _)| (*id, Err(e.clone())))
                    .collect()
            }
        };
        (job.key.start, results)
    }

    fn replay_group(
        &self,
        key: &GroupKey,
        members: &[(RegistrationId, CollectionId)],
    ) -> Result<GroupReplay> {
        let start = self.source.snapshot(key.start)?;
        let end = self.source.snapshot(key.end)?;
        let mut interest = Interest::default().with_tables(key.tables.iter().copied());
        for (_, collection) in members {
            interest = interest.with_tables(collection.tables_of_interest(end.schema()));
            if let Some(list) = collection.list_interest(start.as_ref()) {
                interest.add_list(list);
            }
        }
        let history = self.source.history(key.start, key.end)?;
        let info = replay(&history, &interest);
        self.counters.replays.fetch_add(1, Ordering::Relaxed);
        debug!(
            start = %key.start,
            end = %key.end,
            tables = key.tables.len(),
            instructions = history.len(),
            "replayed group history"
        );
        Ok(GroupReplay {
            info,
            start,
            end,
            results: Mutex::new(HashMap::new()),
        })
    }

    fn group_changes(
        &self,
        replay: &GroupReplay,
        members: &[(RegistrationId, CollectionId)],
    ) -> Vec<(RegistrationId, Result<CollectionChangeSet>)> {
        let mut checker = DeepChangeChecker::new(
            &replay.info,
            replay.end.as_ref(),
            self.config.max_link_depth,
        );
        let mut results = replay.results.lock();
        members
            .iter()
            .map(|(id, collection)| {
                let result = results
                    .entry(collection.key())
                    .or_insert_with(|| {
                        self.counters.changesets.fetch_add(1, Ordering::Relaxed);
                        collection_changes(
                            collection,
                            &mut checker,
                            replay.start.as_ref(),
                            replay.end.as_ref(),
                            &self.config,
                        )
                    })
                    .clone();
                (*id, result)
            })
            .collect()
    }

    /// Returns `true` if `reader` has queued changes at or below `version`.
    pub fn has_deliverable(&self, reader: ReaderId, version: SnapshotVersion) -> bool {
        self.state
            .lock()
            .registrations
            .iter()
            .any(|(_, r)| r.reader == reader && r.callback.is_some() && r.ready(version))
    }

    /// Runs the callbacks of `reader`'s registrations for every queued change
    /// up to `version`, in commit order.
    ///
    /// Callbacks run without the scheduler lock and may register, unregister
    /// or close readers. A registration removed during delivery gets no
    /// further callbacks.
    ///
    /// # Returns
    /// The number of callbacks invoked.
    pub fn deliver(&self, reader: ReaderId, version: SnapshotVersion) -> usize {
        let ids: Vec<RegistrationId> = self
            .state
            .lock()
            .registrations
            .iter()
            .filter(|(_, r)| r.reader == reader && r.ready(version))
            .map(|(id, _)| id)
            .collect();

        let mut invoked = 0;
        for id in ids {
            while self.deliver_next(id, version) {
                invoked += 1;
            }
        }
        invoked
    }

    /// Delivers the oldest queued change of `id`.
    ///
    /// # Returns
    /// `true` if the callback ran, `false` if nothing is deliverable.
    fn deliver_next(&self, id: RegistrationId, version: SnapshotVersion) -> bool {
        let taken = {
            let mut state = self.state.lock();
            state.registrations.get_mut(id).and_then(|registration| {
                if !registration.ready(version) {
                    return None;
                }
                let callback = registration.callback.take()?;
                match registration.pending.pop_front() {
                    Some(next) => Some((callback, next)),
                    None => {
                        registration.callback = Some(callback);
                        None
                    }
                }
            })
        };
        let Some((mut callback, next)) = taken else {
            return false;
        };

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            callback(&next.changes, next.error.as_ref())
        }));
        self.counters.callbacks.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock();
        if outcome.is_ok() && next.error.is_none() {
            if let Some(registration) = state.registrations.get_mut(id) {
                registration.callback = Some(callback);
                return true;
            }
            drop(state);
            trace!(%id, "observer removed during its callback");
        } else {
            let retired = state.registrations.remove(id);
            drop(state);
            if outcome.is_err() {
                error!(%id, "observer callback panicked; retiring it");
            } else {
                warn!(%id, "observer retired after delivering an error");
            }
            drop(retired);
        }
        drop(callback);
        true
    }
}
