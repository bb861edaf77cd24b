//! Background notification worker.
//!
//! Commits are posted to a worker thread over a channel; the worker looks up
//! the listeners registered for the committing store and lets each compute
//! its pending changes. The worker starts with the first listener and stops
//! when the last one is removed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use notify_core::store::CommitHook;
use notify_core::{NotifierConfig, NotifyError, SnapshotVersion};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::registry::{RegistrationId, SlotRegistry};
use crate::scheduler::NotificationScheduler;
use crate::Result;

/// Identity of a store whose commits the daemon fans out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(pub u64);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

/// Something that reacts to commits of a store on the worker thread.
pub trait CommitListener: Send + Sync {
    fn on_commit(&self, version: SnapshotVersion);
}

impl CommitListener for NotificationScheduler {
    fn on_commit(&self, version: SnapshotVersion) {
        if let Err(e) = self.run_to(version) {
            warn!(%version, error = %e, "background computation failed");
        }
    }
}

/// Maps stores to their commit listeners.
pub trait StoreRegistry: Send + Sync {
    /// Adds a listener for `store`.
    fn register(&self, store: StoreId, listener: Arc<dyn CommitListener>) -> RegistrationId;

    /// Removes a listener; returns `true` if it was present.
    fn unregister(&self, store: StoreId, listener: RegistrationId) -> bool;

    /// Listeners currently registered for `store`.
    fn listeners(&self, store: StoreId) -> Vec<Arc<dyn CommitListener>>;

    fn is_empty(&self) -> bool;
}

/// Default [`StoreRegistry`] kept in process memory.
#[derive(Default)]
pub struct InMemoryStoreRegistry {
    stores: Mutex<HashMap<StoreId, SlotRegistry<Arc<dyn CommitListener>>>>,
}

impl StoreRegistry for InMemoryStoreRegistry {
    fn register(&self, store: StoreId, listener: Arc<dyn CommitListener>) -> RegistrationId {
        self.stores.lock().entry(store).or_default().insert(listener)
    }

    fn unregister(&self, store: StoreId, listener: RegistrationId) -> bool {
        let mut stores = self.stores.lock();
        let Some(listeners) = stores.get_mut(&store) else {
            return false;
        };
        let removed = listeners.remove(listener).is_some();
        if listeners.is_empty() {
            stores.remove(&store);
        }
        removed
    }

    fn listeners(&self, store: StoreId) -> Vec<Arc<dyn CommitListener>> {
        self.stores
            .lock()
            .get(&store)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    fn is_empty(&self) -> bool {
        self.stores.lock().is_empty()
    }
}

/// Messages accepted by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonMessage {
    Commit {
        store: StoreId,
        version: SnapshotVersion,
    },
    Shutdown,
}

/// Worker lifecycle: `Stopped -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Running,
    Stopping,
}

struct DaemonInner {
    state: DaemonState,
    sender: Option<mpsc::UnboundedSender<DaemonMessage>>,
    worker: Option<JoinHandle<()>>,
}

/// Runs change computation for registered stores on a background thread.
pub struct NotificationDaemon {
    registry: Arc<dyn StoreRegistry>,
    thread_name: String,
    inner: Mutex<DaemonInner>,
}

impl NotificationDaemon {
    /// Creates a stopped daemon with an in-memory registry.
    pub fn new(config: &NotifierConfig) -> Self {
        Self::with_registry(Arc::new(InMemoryStoreRegistry::default()), config)
    }

    /// Creates a stopped daemon over `registry`.
    pub fn with_registry(registry: Arc<dyn StoreRegistry>, config: &NotifierConfig) -> Self {
        Self {
            registry,
            thread_name: config.worker_thread_name.clone(),
            inner: Mutex::new(DaemonInner {
                state: DaemonState::Stopped,
                sender: None,
                worker: None,
            }),
        }
    }

    pub fn state(&self) -> DaemonState {
        self.inner.lock().state
    }

    /// Adds a listener for `store`, starting the worker if it is stopped.
    pub fn register(
        &self,
        store: StoreId,
        listener: Arc<dyn CommitListener>,
    ) -> Result<RegistrationId> {
        let id = self.registry.register(store, listener);
        let mut inner = self.inner.lock();
        if inner.state == DaemonState::Stopped {
            if let Err(e) = self.start(&mut inner) {
                drop(inner);
                self.registry.unregister(store, id);
                return Err(e);
            }
        }
        debug!(%store, listener = %id, "registered commit listener");
        Ok(id)
    }

    /// Removes a listener, stopping the worker when none remain.
    pub fn unregister(&self, store: StoreId, listener: RegistrationId) -> bool {
        let removed = self.registry.unregister(store, listener);
        if removed && self.registry.is_empty() {
            self.stop();
        }
        removed
    }

    /// Posts a commit to the worker.
    ///
    /// # Returns
    /// `WorkerUnavailable` if the worker is not running.
    pub fn notify_commit(&self, store: StoreId, version: SnapshotVersion) -> Result<()> {
        let inner = self.inner.lock();
        match (inner.state, inner.sender.as_ref()) {
            (DaemonState::Running, Some(sender)) => sender
                .send(DaemonMessage::Commit { store, version })
                .map_err(|_| NotifyError::WorkerUnavailable("worker channel closed".to_string())),
            (state, _) => Err(NotifyError::WorkerUnavailable(format!(
                "daemon is {state:?}"
            ))),
        }
    }

    /// Returns a store commit hook that posts commits for `store`.
    ///
    /// The hook holds the daemon weakly and ignores commits once it is gone.
    pub fn commit_hook(self: &Arc<Self>, store: StoreId) -> CommitHook {
        let daemon: Weak<Self> = Arc::downgrade(self);
        Box::new(move |version| {
            if let Some(daemon) = daemon.upgrade() {
                if let Err(e) = daemon.notify_commit(store, version) {
                    debug!(%store, %version, error = %e, "commit not posted");
                }
            }
        })
    }

    fn start(&self, inner: &mut DaemonInner) -> Result<()> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let registry = Arc::clone(&self.registry);
        let worker = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || run_worker(receiver, registry))
            .map_err(|e| NotifyError::WorkerUnavailable(e.to_string()))?;
        inner.sender = Some(sender);
        inner.worker = Some(worker);
        inner.state = DaemonState::Running;
        info!(thread = %self.thread_name, "notification daemon started");
        Ok(())
    }

    /// Stops the worker after it drains the messages already posted.
    pub fn stop(&self) {
        let worker = {
            let mut inner = self.inner.lock();
            if inner.state != DaemonState::Running {
                return;
            }
            inner.state = DaemonState::Stopping;
            if let Some(sender) = inner.sender.take() {
                let _ = sender.send(DaemonMessage::Shutdown);
            }
            inner.worker.take()
        };

        if let Some(worker) = worker {
            // A listener unregistering itself runs on the worker thread.
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                error!("notification worker panicked");
            }
        }

        let mut inner = self.inner.lock();
        inner.state = DaemonState::Stopped;
        info!("notification daemon stopped");
        // A listener may have arrived while stopping.
        if !self.registry.is_empty() {
            if let Err(e) = self.start(&mut inner) {
                error!(error = %e, "failed to restart notification daemon");
            }
        }
    }
}

impl Drop for NotificationDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<DaemonMessage>,
    registry: Arc<dyn StoreRegistry>,
) {
    while let Some(message) = receiver.blocking_recv() {
        match message {
            DaemonMessage::Commit { store, version } => {
                let listeners = registry.listeners(store);
                debug!(%store, %version, listeners = listeners.len(), "dispatching commit");
                for listener in listeners {
                    listener.on_commit(version);
                }
            }
            DaemonMessage::Shutdown => break,
        }
    }
}
