//! Bounded LRU cache of tasks keyed by id.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;

use crate::task::{Task, TaskId};

/// Snapshot of cache occupancy and effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cache {}/{}, hits {}, misses {}",
            self.len, self.capacity, self.hits, self.misses
        )
    }
}

/// Every access takes the lock for a single map operation, so concurrent
/// readers observe either the old or the new task, never a mix.
pub struct TaskCache {
    entries: Mutex<LruCache<TaskId, Task>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TaskCache {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<TaskId, Task>> {
        // a panic mid-operation cannot leave a half-written Task behind
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a task and mark it most recently used.
    pub fn get(&self, id: TaskId) -> Option<Task> {
        let found = self.entries().get(&id).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Look up without touching recency or statistics.
    pub fn peek(&self, id: TaskId) -> Option<Task> {
        self.entries().peek(&id).cloned()
    }

    /// Insert or overwrite, evicting the least recently used entry when full.
    pub fn put(&self, task: Task) {
        self.entries().put(task.id, task);
    }

    pub fn remove(&self, id: TaskId) -> Option<Task> {
        self.entries().pop(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries().contains(&id)
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries();
        CacheStats {
            len: entries.len(),
            capacity: entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
