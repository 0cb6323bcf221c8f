//! Cached task store with coalesced deferred writes.

mod backend;
mod cache;
mod pending;
mod task_store;
mod ticket;

pub use backend::{MemoryBackend, TaskBackend};
pub use cache::{CacheStats, TaskCache};
pub use pending::PendingKey;
pub use task_store::{BatchOutcome, FlushReport, TaskStore};
pub use ticket::WriteTicket;

use std::time::Duration;

/// Runtime parameters for [`TaskStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub cache_capacity: usize,
    /// Coalescing delay before a deferred write is applied.
    pub write_delay: Duration,
    /// Maximum concurrent backend operations.
    pub workers: usize,
    /// Rows per chunk for batch operations.
    pub batch_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 200,
            write_delay: Duration::from_millis(300),
            workers: 4,
            batch_size: 50,
        }
    }
}
