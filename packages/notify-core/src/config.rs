//! Notifier configuration.

/// Default depth budget for deep change checks.
pub const DEFAULT_MAX_LINK_DEPTH: usize = 4;

/// Configuration for change computation and delivery.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Maximum number of link hops followed when looking for deep changes
    pub max_link_depth: usize,
    /// Whether derived views and tables report rows changed through links
    pub deep_changes: bool,
    /// Name of the background notification worker thread
    pub worker_thread_name: String,
    /// Number of computed groups retained for deduplication
    pub group_cache_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            max_link_depth: DEFAULT_MAX_LINK_DEPTH,
            deep_changes: true,
            worker_thread_name: "notify-worker".to_string(),
            group_cache_capacity: 64,
        }
    }
}
