//! Observer registration, scheduling and delivery of change notifications.
//!
//! Readers pin a version of a [`VersionedSource`](notify_core::VersionedSource)
//! and register observers on collections. The [`NotificationScheduler`]
//! computes one shared diff per group of observers and queues the results;
//! each reader delivers them on its own thread when it advances. The
//! [`NotificationDaemon`] runs computation on a background worker as commits
//! arrive.

mod daemon;
mod reader;
mod registry;
mod scheduler;

pub use daemon::{
    CommitListener, DaemonMessage, DaemonState, InMemoryStoreRegistry, NotificationDaemon,
    StoreId, StoreRegistry,
};
pub use reader::{BindingContext, NotificationToken, Reader, ReaderHandle};
pub use registry::{RegistrationId, SlotRegistry};
pub use scheduler::{
    NotificationCallback, NotificationScheduler, ReaderId, RegistrationState, SchedulerStats,
};

use notify_core::NotifyError;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, NotifyError>;
