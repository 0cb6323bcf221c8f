//! Backing-store contract and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;
use crate::task::{Quadrant, Task, TaskId};

/// Persistent storage behind the [`TaskStore`](super::TaskStore) cache.
///
/// Methods are blocking; the store calls them from its worker pool.
/// Every list method returns tasks ordered by start time ascending.
/// Updating or deleting a missing row is not an error.
pub trait TaskBackend: Send + Sync {
    /// Point lookup. Returns `None` if the row does not exist.
    fn get(&self, id: TaskId) -> Result<Option<Task>, DatabaseError>;

    /// Tasks whose start time lies in `[start, end)`.
    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Task>, DatabaseError>;

    fn list_all(&self) -> Result<Vec<Task>, DatabaseError>;

    fn list_by_importance(&self, importance: Quadrant) -> Result<Vec<Task>, DatabaseError>;

    fn list_incomplete(&self) -> Result<Vec<Task>, DatabaseError>;

    /// Persist a new row and return its identifier. The `id` field of `task` is ignored.
    fn insert(&self, task: &Task) -> Result<TaskId, DatabaseError>;

    fn update(&self, task: &Task) -> Result<(), DatabaseError>;

    fn delete(&self, id: TaskId) -> Result<(), DatabaseError>;

    /// Insert several rows. Implementations may make this atomic.
    fn insert_all(&self, tasks: &[Task]) -> Result<Vec<TaskId>, DatabaseError> {
        tasks.iter().map(|t| self.insert(t)).collect()
    }

    fn update_all(&self, tasks: &[Task]) -> Result<(), DatabaseError> {
        tasks.iter().try_for_each(|t| self.update(t))
    }

    /// Delete several rows, returning how many existed.
    fn delete_all(&self, ids: &[TaskId]) -> Result<usize, DatabaseError> {
        let mut deleted = 0;
        for id in ids {
            if self.get(*id)?.is_some() {
                self.delete(*id)?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// Ephemeral backend keyed by id.
///
/// Counts physical writes so callers can observe write coalescing, and can
/// be switched into a failing mode to exercise error paths.
#[derive(Default)]
pub struct MemoryBackend {
    rows: Mutex<BTreeMap<TaskId, Task>>,
    next_id: AtomicUsize,
    writes: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical insert/update/delete operations applied so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail with [`DatabaseError::QueryFailed`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), DatabaseError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DatabaseError::QueryFailed("memory backend set to fail".into()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<TaskId, Task>>, DatabaseError> {
        self.rows
            .lock()
            .map_err(|_| DatabaseError::QueryFailed("memory backend poisoned".into()))
    }

    fn sorted<F>(&self, keep: F) -> Result<Vec<Task>, DatabaseError>
    where
        F: Fn(&Task) -> bool,
    {
        self.check()?;
        let rows = self.lock()?;
        let mut tasks: Vec<Task> = rows.values().filter(|t| keep(t)).cloned().collect();
        tasks.sort_by_key(|t| (t.start_time, t.id));
        Ok(tasks)
    }
}

impl TaskBackend for MemoryBackend {
    fn get(&self, id: TaskId) -> Result<Option<Task>, DatabaseError> {
        self.check()?;
        Ok(self.lock()?.get(&id).cloned())
    }

    fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Task>, DatabaseError> {
        self.sorted(|t| t.start_time >= start && t.start_time < end)
    }

    fn list_all(&self) -> Result<Vec<Task>, DatabaseError> {
        self.sorted(|_| true)
    }

    fn list_by_importance(&self, importance: Quadrant) -> Result<Vec<Task>, DatabaseError> {
        self.sorted(|t| t.importance == importance)
    }

    fn list_incomplete(&self) -> Result<Vec<Task>, DatabaseError> {
        self.sorted(|t| !t.completed)
    }

    fn insert(&self, task: &Task) -> Result<TaskId, DatabaseError> {
        self.check()?;
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1);
        let mut row = task.clone();
        row.id = id;
        self.lock()?.insert(id, row);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    fn update(&self, task: &Task) -> Result<(), DatabaseError> {
        self.check()?;
        let mut rows = self.lock()?;
        if let Some(row) = rows.get_mut(&task.id) {
            *row = task.clone();
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, id: TaskId) -> Result<(), DatabaseError> {
        self.check()?;
        self.lock()?.remove(&id);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
