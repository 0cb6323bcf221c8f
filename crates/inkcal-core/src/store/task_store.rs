//! The cached, write-coalescing task store.
//!
//! Reads are served from an LRU cache when possible. Writes update the cache
//! at once and are applied to the backend after a short delay; a newer write
//! for the same task replaces one that has not fired yet.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, RwLock, Semaphore};

use super::backend::TaskBackend;
use super::cache::{CacheStats, TaskCache};
use super::pending::{PendingEntry, PendingKey, PendingOp, PendingWrites, Reply};
use super::ticket::WriteTicket;
use super::StoreConfig;
use crate::calendar::day_bounds;
use crate::error::{DatabaseError, StoreError, ValidationError};
use crate::task::{Quadrant, Task, TaskId};

/// Result of [`TaskStore::flush_pending`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub applied: usize,
    pub failed: usize,
}

/// Result of a batch write. `count` is the number of rows affected by
/// successful chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub success: bool,
    pub count: usize,
}

/// Cheap to clone; clones share the cache, pending writes and workers.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn TaskBackend>,
    cache: TaskCache,
    // lock order: pending before cache
    pending: Mutex<PendingWrites>,
    workers: Arc<Semaphore>,
    // deferred writes hold it shared while running; flush takes it exclusively
    flush_gate: RwLock<()>,
    config: StoreConfig,
    runtime: Handle,
}

impl TaskStore {
    /// Create a store on the current tokio runtime.
    ///
    /// # Errors
    /// Returns [`StoreError::WorkerUnavailable`] when called outside a runtime.
    pub fn new(backend: Arc<dyn TaskBackend>, config: StoreConfig) -> Result<Self, StoreError> {
        let runtime = Handle::try_current().map_err(|_| StoreError::WorkerUnavailable)?;
        Ok(Self::with_runtime(backend, config, runtime))
    }

    pub fn with_runtime(backend: Arc<dyn TaskBackend>, config: StoreConfig, runtime: Handle) -> Self {
        let workers = config.workers.max(1);
        Self {
            inner: Arc::new(Inner {
                backend,
                cache: TaskCache::new(config.cache_capacity),
                pending: Mutex::new(PendingWrites::default()),
                workers: Arc::new(Semaphore::new(workers)),
                flush_gate: RwLock::new(()),
                config,
                runtime,
            }),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn pending(&self) -> MutexGuard<'_, PendingWrites> {
        self.inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a blocking backend call on the worker pool.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn TaskBackend) -> Result<T, DatabaseError> + Send + 'static,
    {
        let _permit = self
            .inner
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::WorkerUnavailable)?;
        let backend = Arc::clone(&self.inner.backend);
        let result = tokio::task::spawn_blocking(move || f(backend.as_ref()))
            .await
            .map_err(|_| StoreError::WorkerUnavailable)?;
        Ok(result?)
    }

    // ── reads ──────────────────────────────────────────────────────────

    /// Look up a task by id.
    ///
    /// Returns `Ok(None)` when the task does not exist or has a pending delete.
    pub async fn get_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let since = {
            let pending = self.pending();
            if pending.has_pending_delete(id) {
                return Ok(None);
            }
            if let Some(task) = self.inner.cache.get(id) {
                tracing::debug!("cache hit for task {}", id);
                return Ok(Some(task));
            }
            if let Some(task) = pending.pending_update(id) {
                let task = task.clone();
                self.inner.cache.put(task.clone());
                return Ok(Some(task));
            }
            pending.clock()
        };

        tracing::debug!("cache miss for task {}", id);
        let loaded = self.run_blocking(move |b| b.get(id)).await?;

        let pending = self.pending();
        if pending.has_pending_delete(id) {
            return Ok(None);
        }
        if let Some(newer) = pending.pending_update(id) {
            return Ok(Some(newer.clone()));
        }
        if pending.changed_since(id, since) {
            // the row may predate a write that finished while it was read
            tracing::debug!("task {} written during read, not cached", id);
            return Ok(self.inner.cache.peek(id).or(loaded));
        }
        if let Some(task) = &loaded {
            self.inner.cache.put(task.clone());
        }
        Ok(loaded)
    }

    /// Tasks starting in `[start, end)`, ordered by start time.
    ///
    /// Always queries the backend. Pending updates and deletes are applied
    /// on top of the result so callers see their own writes.
    pub async fn get_by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Task>, StoreError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let since = self.pending().clock();
        let rows = self.run_blocking(move |b| b.range(start, end)).await?;
        Ok(self.merge_pending(rows, since, |t| {
            t.start_time >= start && t.start_time < end
        }))
    }

    /// Like [`get_by_range`](Self::get_by_range) but a failure yields an empty list.
    pub async fn get_range_or_empty(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Task> {
        match self.get_by_range(start, end).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("range query {}..{} failed: {}", start, end, e);
                Vec::new()
            }
        }
    }

    /// Tasks starting on the local calendar day `date`.
    pub async fn get_by_date<Tz: TimeZone>(
        &self,
        date: NaiveDate,
        tz: &Tz,
    ) -> Result<Vec<Task>, StoreError> {
        let (start, end) = day_bounds(date, tz);
        self.get_by_range(start, end).await
    }

    pub async fn get_all(&self) -> Result<Vec<Task>, StoreError> {
        let since = self.pending().clock();
        let rows = self.run_blocking(|b| b.list_all()).await?;
        Ok(self.merge_pending(rows, since, |_| true))
    }

    pub async fn get_by_importance(&self, importance: Quadrant) -> Result<Vec<Task>, StoreError> {
        let since = self.pending().clock();
        let rows = self
            .run_blocking(move |b| b.list_by_importance(importance))
            .await?;
        Ok(self.merge_pending(rows, since, |t| t.importance == importance))
    }

    pub async fn get_incomplete(&self) -> Result<Vec<Task>, StoreError> {
        let since = self.pending().clock();
        let rows = self.run_blocking(|b| b.list_incomplete()).await?;
        Ok(self.merge_pending(rows, since, |t| !t.completed))
    }

    /// Warm the cache for an upcoming range without waiting for it.
    pub fn preload_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
        let store = self.clone();
        self.inner.runtime.spawn(async move {
            match store.get_by_range(start, end).await {
                Ok(tasks) => tracing::debug!("preloaded {} tasks", tasks.len()),
                Err(e) => tracing::warn!("preload {}..{} failed: {}", start, end, e),
            }
        });
    }

    /// Cache backend rows and overlay writes that have not reached the backend.
    ///
    /// `since` is the write clock taken before the rows were read. Rows
    /// written after that are served from the cache when possible and never
    /// cached themselves.
    fn merge_pending<F>(&self, rows: Vec<Task>, since: u64, keep: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let pending = self.pending();
        let mut seen = HashSet::with_capacity(rows.len());
        let mut tasks = Vec::with_capacity(rows.len());

        for row in rows {
            if pending.has_pending_delete(row.id) {
                continue;
            }
            seen.insert(row.id);
            let task = match pending.pending_update(row.id) {
                Some(newer) => newer.clone(),
                None if pending.changed_since(row.id, since) => {
                    self.inner.cache.peek(row.id).unwrap_or(row)
                }
                None => {
                    self.inner.cache.put(row.clone());
                    row
                }
            };
            if keep(&task) {
                tasks.push(task);
            }
        }

        // an update may have moved a task into the filter
        for task in pending.pending_updates() {
            if !seen.contains(&task.id) && !pending.has_pending_delete(task.id) && keep(task) {
                tasks.push(task.clone());
            }
        }

        tasks.sort_by_key(|t| (t.start_time, t.id));
        tasks
    }

    // ── deferred writes ────────────────────────────────────────────────

    /// Schedule an insert. The ticket resolves with the assigned id.
    ///
    /// # Errors
    /// Returns a validation error immediately if the task is malformed.
    pub fn insert(&self, task: Task) -> Result<WriteTicket<TaskId>, StoreError> {
        task.validate()?;
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending();
        let key = pending.next_insert_key();
        self.schedule_locked(&mut pending, key, PendingOp::Insert { task, reply: tx });
        Ok(WriteTicket::new(rx))
    }

    /// Update the cached task at once and schedule the backend write.
    ///
    /// # Errors
    /// Returns a validation error immediately if the task is malformed or
    /// has no assigned id.
    pub fn update(&self, task: Task) -> Result<WriteTicket<()>, StoreError> {
        task.validate()?;
        if !task.id.is_assigned() {
            return Err(ValidationError::UnassignedId.into());
        }
        let id = task.id;
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending();
        pending.mark_changed(id);
        if !pending.has_pending_delete(id) {
            self.inner.cache.put(task.clone());
        }
        let mut replies = pending.supersede(&[PendingKey::Update(id)]);
        replies.push(tx);
        self.schedule_locked(&mut pending, PendingKey::Update(id), PendingOp::Update { task, replies });
        Ok(WriteTicket::new(rx))
    }

    /// Evict the task from the cache and schedule the backend delete.
    pub fn delete(&self, task: &Task) -> Result<WriteTicket<()>, StoreError> {
        self.delete_by_id(task.id)
    }

    pub fn delete_by_id(&self, id: TaskId) -> Result<WriteTicket<()>, StoreError> {
        if !id.is_assigned() {
            return Err(ValidationError::UnassignedId.into());
        }
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending();
        pending.mark_changed(id);
        self.inner.cache.remove(id);
        let mut replies = pending.supersede(&[PendingKey::Update(id), PendingKey::Delete(id)]);
        replies.push(tx);
        self.schedule_locked(&mut pending, PendingKey::Delete(id), PendingOp::Delete { id, replies });
        Ok(WriteTicket::new(rx))
    }

    fn schedule_locked(&self, pending: &mut PendingWrites, key: PendingKey, op: PendingOp) {
        let seq = pending.next_seq();
        let delay = self.inner.config.write_delay;
        let store = self.clone();
        let timer = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            store.fire(key, seq).await;
        });
        pending.insert(
            key,
            PendingEntry {
                seq,
                op,
                timer: Some(timer),
            },
        );
        tracing::debug!("scheduled {} in {:?}", key, delay);
    }

    async fn fire(&self, key: PendingKey, seq: u64) {
        let _gate = self.inner.flush_gate.read().await;
        let op = self.pending().take_if_current(key, seq);
        if let Some(op) = op {
            self.apply(key, op).await;
        }
    }

    /// Execute one deferred operation. Returns whether it succeeded.
    async fn apply(&self, key: PendingKey, op: PendingOp) -> bool {
        match op {
            PendingOp::Insert { task, reply } => {
                let row = task.clone();
                match self.run_blocking(move |b| b.insert(&row)).await {
                    Ok(id) => {
                        let mut task = task;
                        task.id = id;
                        self.inner.cache.put(task);
                        tracing::debug!("applied {} as task {}", key, id);
                        let _ = reply.send(Ok(id));
                        true
                    }
                    Err(e) => {
                        tracing::error!("deferred {} failed: {}", key, e);
                        let _ = reply.send(Err(e));
                        false
                    }
                }
            }
            PendingOp::Update { task, replies } => {
                let id = task.id;
                let outcome = self.run_blocking(move |b| b.update(&task)).await;
                let mut pending = self.pending();
                pending.mark_changed(id);
                if outcome.is_err() && pending.pending_update(id).is_none() {
                    // fall back to the persisted row
                    self.inner.cache.remove(id);
                }
                drop(pending);
                Self::resolve(key, replies, outcome)
            }
            PendingOp::Delete { id, replies } => {
                let outcome = self.run_blocking(move |b| b.delete(id)).await;
                self.pending().mark_changed(id);
                Self::resolve(key, replies, outcome)
            }
        }
    }

    fn resolve(key: PendingKey, replies: Vec<Reply<()>>, outcome: Result<(), StoreError>) -> bool {
        match &outcome {
            Ok(()) => tracing::debug!("applied {}", key),
            Err(e) => tracing::error!("deferred {} failed: {}", key, e),
        }
        for reply in replies {
            let _ = reply.send(outcome.clone());
        }
        outcome.is_ok()
    }

    /// Apply every scheduled write now, in scheduling order.
    ///
    /// Writes already running when this is called are awaited as well.
    pub async fn flush_pending(&self) -> FlushReport {
        let drained = self.pending().drain_ordered();
        let _gate = self.inner.flush_gate.write().await;

        let mut report = FlushReport::default();
        for (key, op) in drained {
            if self.apply(key, op).await {
                report.applied += 1;
            } else {
                report.failed += 1;
            }
        }
        if report.applied + report.failed > 0 {
            tracing::info!(
                "flushed {} pending writes ({} failed)",
                report.applied + report.failed,
                report.failed
            );
        }
        report
    }

    /// Number of writes scheduled but not yet started.
    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    /// Scheduled write keys in scheduling order.
    pub fn pending_keys(&self) -> Vec<PendingKey> {
        self.pending().keys()
    }

    // ── batch writes ───────────────────────────────────────────────────

    /// Insert tasks immediately in chunks of `batch_size`.
    ///
    /// # Errors
    /// Returns a validation error before writing anything if any task is malformed.
    pub async fn insert_many(&self, tasks: Vec<Task>) -> Result<BatchOutcome, StoreError> {
        for task in &tasks {
            task.validate()?;
        }
        let mut outcome = BatchOutcome {
            success: true,
            count: 0,
        };
        for chunk in tasks.chunks(self.inner.config.batch_size.max(1)) {
            let rows = chunk.to_vec();
            let written = rows.clone();
            match self.run_blocking(move |b| b.insert_all(&rows)).await {
                Ok(ids) => {
                    for (mut task, id) in written.into_iter().zip(ids) {
                        task.id = id;
                        self.inner.cache.put(task);
                        outcome.count += 1;
                    }
                }
                Err(e) => {
                    tracing::error!("batch insert of {} tasks failed: {}", chunk.len(), e);
                    outcome.success = false;
                }
            }
        }
        Ok(outcome)
    }

    /// Update tasks immediately. Pending updates for the same tasks are
    /// replaced and their tickets resolve with the batch outcome.
    pub async fn update_many(&self, tasks: Vec<Task>) -> Result<BatchOutcome, StoreError> {
        for task in &tasks {
            task.validate()?;
            if !task.id.is_assigned() {
                return Err(ValidationError::UnassignedId.into());
            }
        }
        let mut outcome = BatchOutcome {
            success: true,
            count: 0,
        };
        for chunk in tasks.chunks(self.inner.config.batch_size.max(1)) {
            let replies = {
                let mut pending = self.pending();
                let mut replies = Vec::new();
                for task in chunk {
                    pending.mark_changed(task.id);
                    replies.extend(pending.supersede(&[PendingKey::Update(task.id)]));
                    self.inner.cache.put(task.clone());
                }
                replies
            };
            let rows = chunk.to_vec();
            let result = self.run_blocking(move |b| b.update_all(&rows)).await;
            self.mark_all_changed(chunk.iter().map(|t| t.id));
            match &result {
                Ok(()) => outcome.count += chunk.len(),
                Err(e) => {
                    tracing::error!("batch update of {} tasks failed: {}", chunk.len(), e);
                    outcome.success = false;
                    for task in chunk {
                        self.inner.cache.remove(task.id);
                    }
                }
            }
            for reply in replies {
                let _ = reply.send(result.clone());
            }
        }
        Ok(outcome)
    }

    /// Delete tasks immediately. Pending writes for them are cancelled and
    /// their tickets resolve with the batch outcome.
    pub async fn delete_many(&self, ids: Vec<TaskId>) -> Result<BatchOutcome, StoreError> {
        if ids.iter().any(|id| !id.is_assigned()) {
            return Err(ValidationError::UnassignedId.into());
        }
        let mut outcome = BatchOutcome {
            success: true,
            count: 0,
        };
        for chunk in ids.chunks(self.inner.config.batch_size.max(1)) {
            let replies = {
                let mut pending = self.pending();
                let mut replies = Vec::new();
                for id in chunk {
                    pending.mark_changed(*id);
                    self.inner.cache.remove(*id);
                    replies.extend(
                        pending.supersede(&[PendingKey::Update(*id), PendingKey::Delete(*id)]),
                    );
                }
                replies
            };
            let rows = chunk.to_vec();
            let result = self.run_blocking(move |b| b.delete_all(&rows)).await;
            self.mark_all_changed(chunk.iter().copied());
            match &result {
                Ok(deleted) => outcome.count += deleted,
                Err(e) => {
                    tracing::error!("batch delete of {} tasks failed: {}", chunk.len(), e);
                    outcome.success = false;
                }
            }
            let unit = result.map(|_| ());
            for reply in replies {
                let _ = reply.send(unit.clone());
            }
        }
        Ok(outcome)
    }

    fn mark_all_changed(&self, ids: impl IntoIterator<Item = TaskId>) {
        let mut pending = self.pending();
        for id in ids {
            pending.mark_changed(id);
        }
    }

    // ── cache management ───────────────────────────────────────────────

    /// Drop every cached task. Pending writes are kept.
    pub fn invalidate_all(&self) {
        self.inner.cache.clear();
        tracing::debug!("task cache invalidated");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Flush pending writes and clear the cache.
    pub async fn shutdown(&self) -> FlushReport {
        let report = self.flush_pending().await;
        self.inner.cache.clear();
        tracing::info!("task store shut down ({})", self.cache_stats());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn task(title: &str, day: u32, hour: u32) -> Task {
        Task::new(title, at(day, hour), at(day, hour) + ChronoDuration::hours(1))
    }

    fn config(delay_ms: u64) -> StoreConfig {
        StoreConfig {
            cache_capacity: 16,
            write_delay: Duration::from_millis(delay_ms),
            workers: 2,
            batch_size: 2,
        }
    }

    fn store_with(delay_ms: u64) -> (TaskStore, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let store = TaskStore::new(backend.clone(), config(delay_ms)).unwrap();
        (store, backend)
    }

    fn seeded(backend: &MemoryBackend, t: Task) -> Task {
        let id = backend.insert(&t).unwrap();
        Task { id, ..t }
    }

    /// Memory backend whose point/range reads and updates take a while.
    /// Reads fetch the rows first and then stall.
    struct SlowBackend {
        rows: MemoryBackend,
        read_delay: Duration,
        update_delay: Duration,
        reads: AtomicUsize,
        updates: AtomicUsize,
    }

    impl SlowBackend {
        fn new(read_delay: Duration, update_delay: Duration) -> Self {
            Self {
                rows: MemoryBackend::new(),
                read_delay,
                update_delay,
                reads: AtomicUsize::new(0),
                updates: AtomicUsize::new(0),
            }
        }

        fn stall<T>(&self, fetched: Result<T, DatabaseError>) -> Result<T, DatabaseError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.read_delay);
            fetched
        }

        async fn wait_for(counter: &AtomicUsize, n: usize) {
            for _ in 0..500 {
                if counter.load(Ordering::SeqCst) >= n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            panic!("backend call never started");
        }
    }

    impl TaskBackend for SlowBackend {
        fn get(&self, id: TaskId) -> Result<Option<Task>, DatabaseError> {
            self.stall(self.rows.get(id))
        }

        fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Task>, DatabaseError> {
            self.stall(self.rows.range(start, end))
        }

        fn list_all(&self) -> Result<Vec<Task>, DatabaseError> {
            self.rows.list_all()
        }

        fn list_by_importance(&self, importance: Quadrant) -> Result<Vec<Task>, DatabaseError> {
            self.rows.list_by_importance(importance)
        }

        fn list_incomplete(&self) -> Result<Vec<Task>, DatabaseError> {
            self.rows.list_incomplete()
        }

        fn insert(&self, task: &Task) -> Result<TaskId, DatabaseError> {
            self.rows.insert(task)
        }

        fn update(&self, task: &Task) -> Result<(), DatabaseError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.update_delay);
            self.rows.update(task)
        }

        fn delete(&self, id: TaskId) -> Result<(), DatabaseError> {
            self.rows.delete(id)
        }
    }

    fn slow_store(read_ms: u64, update_ms: u64) -> (TaskStore, Arc<SlowBackend>) {
        let backend = Arc::new(SlowBackend::new(
            Duration::from_millis(read_ms),
            Duration::from_millis(update_ms),
        ));
        let config = StoreConfig {
            workers: 4,
            ..config(10)
        };
        let store = TaskStore::new(backend.clone(), config).unwrap();
        (store, backend)
    }

    #[test]
    fn new_outside_runtime_fails() {
        let backend = Arc::new(MemoryBackend::new());
        assert!(matches!(
            TaskStore::new(backend, StoreConfig::default()),
            Err(StoreError::WorkerUnavailable)
        ));
    }

    #[tokio::test]
    async fn range_is_sorted_and_half_open() {
        let (store, backend) = store_with(1_000);
        seeded(&backend, task("c", 1, 15));
        seeded(&backend, task("a", 1, 8));
        seeded(&backend, task("b", 1, 12));
        seeded(&backend, task("next", 2, 0));

        let tasks = store.get_by_range(at(1, 0), at(2, 0)).await.unwrap();
        let titles: Vec<_> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", "c"]);
        assert!(store.get_by_range(at(2, 0), at(1, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn range_populates_cache() {
        let (store, backend) = store_with(1_000);
        let t = seeded(&backend, task("a", 1, 8));
        store.get_by_range(at(1, 0), at(2, 0)).await.unwrap();

        backend.set_failing(true);
        assert_eq!(store.get_by_id(t.id).await.unwrap().unwrap().title, "a");
        assert_eq!(store.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn get_by_id_distinguishes_missing_from_failure() {
        let (store, backend) = store_with(1_000);
        assert!(store.get_by_id(TaskId(42)).await.unwrap().is_none());

        backend.set_failing(true);
        assert!(matches!(
            store.get_by_id(TaskId(42)).await,
            Err(StoreError::Backend(_))
        ));
        assert!(store.get_range_or_empty(at(1, 0), at(2, 0)).await.is_empty());
    }

    #[tokio::test]
    async fn update_is_visible_before_it_is_written() {
        let (store, backend) = store_with(1_000);
        let original = seeded(&backend, task("before", 1, 9));

        let edited = Task {
            title: "after".into(),
            ..original.clone()
        };
        let _ticket = store.update(edited).unwrap();

        assert_eq!(store.get_by_id(original.id).await.unwrap().unwrap().title, "after");
        let ranged = store.get_by_range(at(1, 0), at(2, 0)).await.unwrap();
        assert_eq!(ranged[0].title, "after");
        assert_eq!(backend.get(original.id).unwrap().unwrap().title, "before");
        assert_eq!(store.pending_len(), 1);
    }

    #[tokio::test]
    async fn rapid_updates_coalesce_into_one_write() {
        let (store, backend) = store_with(50);
        let original = seeded(&backend, task("v0", 1, 9));
        let writes_before = backend.writes();

        let first = store
            .update(Task {
                title: "v1".into(),
                ..original.clone()
            })
            .unwrap();
        let second = store
            .update(Task {
                title: "v2".into(),
                ..original.clone()
            })
            .unwrap();

        second.await.unwrap();
        first.await.unwrap();
        assert_eq!(backend.writes() - writes_before, 1);
        assert_eq!(backend.get(original.id).unwrap().unwrap().title, "v2");
        assert_eq!(store.pending_len(), 0);
    }

    #[tokio::test]
    async fn flush_applies_every_scheduled_operation() {
        let (store, backend) = store_with(60_000);
        let a = seeded(&backend, task("a", 1, 9));
        let b = seeded(&backend, task("b", 1, 10));
        let writes_before = backend.writes();

        let t1 = store.insert(task("new", 1, 11)).unwrap();
        let t2 = store
            .update(Task {
                completed: true,
                ..a.clone()
            })
            .unwrap();
        let t3 = store.delete(&b).unwrap();
        assert_eq!(store.pending_len(), 3);

        let report = store.flush_pending().await;
        assert_eq!(report, FlushReport { applied: 3, failed: 0 });
        assert_eq!(store.pending_len(), 0);
        assert_eq!(backend.writes() - writes_before, 3);

        let new_id = t1.await.unwrap();
        t2.await.unwrap();
        t3.await.unwrap();
        assert!(backend.get(a.id).unwrap().unwrap().completed);
        assert!(backend.get(b.id).unwrap().is_none());
        assert_eq!(store.get_by_id(new_id).await.unwrap().unwrap().title, "new");
    }

    #[tokio::test]
    async fn flush_runs_in_scheduling_order() {
        let (store, backend) = store_with(60_000);
        let original = seeded(&backend, task("v0", 1, 9));

        let _update = store
            .update(Task {
                title: "v1".into(),
                ..original.clone()
            })
            .unwrap();
        let _insert = store.insert(task("other", 2, 9)).unwrap();
        assert_eq!(
            store.pending_keys(),
            vec![PendingKey::Update(original.id), PendingKey::Insert(1)]
        );
        store.flush_pending().await;
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn delete_supersedes_pending_update() {
        let (store, backend) = store_with(60_000);
        let original = seeded(&backend, task("doomed", 1, 9));
        let writes_before = backend.writes();

        let update = store
            .update(Task {
                title: "edited".into(),
                ..original.clone()
            })
            .unwrap();
        let delete = store.delete(&original).unwrap();

        assert_eq!(store.pending_len(), 1);
        assert!(store.get_by_id(original.id).await.unwrap().is_none());
        assert!(store
            .get_by_range(at(1, 0), at(2, 0))
            .await
            .unwrap()
            .is_empty());

        store.flush_pending().await;
        update.await.unwrap();
        delete.await.unwrap();
        assert_eq!(backend.writes() - writes_before, 1);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn pending_update_can_move_task_into_range() {
        let (store, backend) = store_with(60_000);
        let original = seeded(&backend, task("moved", 3, 9));

        let _ticket = store
            .update(Task {
                start_time: at(1, 9),
                end_time: at(1, 10),
                ..original.clone()
            })
            .unwrap();
        let day_one = store.get_by_range(at(1, 0), at(2, 0)).await.unwrap();
        assert_eq!(day_one.len(), 1);
        assert!(store.get_by_range(at(3, 0), at(4, 0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_is_reported_through_ticket() {
        let (store, backend) = store_with(60_000);
        let original = seeded(&backend, task("v0", 1, 9));
        let ticket = store
            .update(Task {
                title: "lost".into(),
                ..original.clone()
            })
            .unwrap();

        backend.set_failing(true);
        let report = store.flush_pending().await;
        assert_eq!(report.failed, 1);
        assert!(matches!(ticket.await, Err(StoreError::Backend(_))));

        // the cache no longer claims the lost value
        backend.set_failing(false);
        assert_eq!(store.get_by_id(original.id).await.unwrap().unwrap().title, "v0");
    }

    #[tokio::test]
    async fn validation_errors_are_synchronous() {
        let (store, _backend) = store_with(60_000);
        assert!(matches!(
            store.insert(task("", 1, 9)),
            Err(StoreError::Validation(ValidationError::EmptyTitle))
        ));
        assert!(matches!(
            store.update(task("no id", 1, 9)),
            Err(StoreError::Validation(ValidationError::UnassignedId))
        ));
        assert!(matches!(
            store.delete_by_id(TaskId::UNASSIGNED),
            Err(StoreError::Validation(ValidationError::UnassignedId))
        ));
        assert_eq!(store.pending_len(), 0);
    }

    #[tokio::test]
    async fn invalidate_keeps_pending_writes() {
        let (store, backend) = store_with(60_000);
        let original = seeded(&backend, task("v0", 1, 9));
        let _ticket = store
            .update(Task {
                title: "v1".into(),
                ..original.clone()
            })
            .unwrap();

        store.invalidate_all();
        assert_eq!(store.cache_stats().len, 0);
        assert_eq!(store.pending_len(), 1);
        assert_eq!(store.get_by_id(original.id).await.unwrap().unwrap().title, "v1");
    }

    #[tokio::test]
    async fn batch_operations_chunk_and_count() {
        let (store, backend) = store_with(60_000);
        let inserted = store
            .insert_many(vec![
                task("a", 1, 8),
                task("b", 1, 9),
                task("c", 1, 10),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, BatchOutcome { success: true, count: 3 });
        assert_eq!(backend.len(), 3);

        let all = store.get_all().await.unwrap();
        let completed: Vec<Task> = all
            .iter()
            .cloned()
            .map(|t| Task { completed: true, ..t })
            .collect();
        let updated = store.update_many(completed).await.unwrap();
        assert_eq!(updated.count, 3);
        assert!(store.get_incomplete().await.unwrap().is_empty());

        let ids: Vec<TaskId> = all.iter().map(|t| t.id).chain([TaskId(999)]).collect();
        let deleted = store.delete_many(ids).await.unwrap();
        assert_eq!(deleted, BatchOutcome { success: true, count: 3 });
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn batch_failure_marks_outcome() {
        let (store, backend) = store_with(60_000);
        backend.set_failing(true);
        let outcome = store
            .insert_many(vec![task("a", 1, 8), task("b", 1, 9)])
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome { success: false, count: 0 });
    }

    #[tokio::test]
    async fn batch_update_resolves_superseded_tickets() {
        let (store, backend) = store_with(60_000);
        let original = seeded(&backend, task("v0", 1, 9));
        let ticket = store
            .update(Task {
                title: "v1".into(),
                ..original.clone()
            })
            .unwrap();
        store
            .update_many(vec![Task {
                title: "v2".into(),
                ..original.clone()
            }])
            .await
            .unwrap();

        ticket.await.unwrap();
        assert_eq!(store.pending_len(), 0);
        assert_eq!(backend.get(original.id).unwrap().unwrap().title, "v2");
    }

    #[tokio::test]
    async fn list_queries_filter() {
        let (store, backend) = store_with(60_000);
        seeded(&backend, task("plain", 1, 8));
        seeded(&backend, task("urgent", 1, 9).with_importance(Quadrant::UrgentImportant));

        let urgent = store.get_by_importance(Quadrant::UrgentImportant).await.unwrap();
        assert_eq!(urgent.len(), 1);
        assert_eq!(urgent[0].title, "urgent");
        assert_eq!(store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn get_by_date_uses_local_day() {
        let (store, backend) = store_with(60_000);
        seeded(&backend, task("early", 1, 23));
        seeded(&backend, task("late", 2, 1));

        let tz = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        // local day 2024-05-02 starts at 2024-05-01 22:00 UTC
        let tasks = store.get_by_date(date, &tz).await.unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[tokio::test]
    async fn preload_warms_cache() {
        let (store, backend) = store_with(60_000);
        let t = seeded(&backend, task("a", 1, 8));
        store.preload_range(at(1, 0), at(2, 0));

        for _ in 0..50 {
            if store.cache_stats().len == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        backend.set_failing(true);
        assert!(store.get_by_id(t.id).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn read_overlapping_an_update_does_not_cache_the_old_row() {
        let (store, backend) = slow_store(200, 0);
        let original = seeded(&backend.rows, task("v0", 1, 9));

        let reader = {
            let store = store.clone();
            tokio::spawn(async move { store.get_by_id(original.id).await })
        };
        SlowBackend::wait_for(&backend.reads, 1).await;

        store
            .update(Task {
                title: "v1".into(),
                ..original.clone()
            })
            .unwrap()
            .await
            .unwrap();
        assert_eq!(backend.rows.get(original.id).unwrap().unwrap().title, "v1");

        // the read fetched v0 before the write landed
        let overlapped = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(overlapped.title, "v1");
        assert_eq!(store.get_by_id(original.id).await.unwrap().unwrap().title, "v1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn range_overlapping_a_delete_does_not_resurrect_the_task() {
        let (store, backend) = slow_store(200, 0);
        let original = seeded(&backend.rows, task("doomed", 1, 9));

        let reader = {
            let store = store.clone();
            tokio::spawn(async move { store.get_by_range(at(1, 0), at(2, 0)).await })
        };
        SlowBackend::wait_for(&backend.reads, 1).await;

        store.delete_by_id(original.id).unwrap().await.unwrap();
        assert!(backend.rows.is_empty());

        reader.await.unwrap().unwrap();
        assert_eq!(store.cache_stats().len, 0);
        assert!(store.get_by_id(original.id).await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn flush_waits_for_a_write_already_running() {
        let (store, backend) = slow_store(0, 200);
        let original = seeded(&backend.rows, task("v0", 1, 9));
        let writes_before = backend.rows.writes();

        let ticket = store
            .update(Task {
                title: "v1".into(),
                ..original.clone()
            })
            .unwrap();
        // the timer has fired and the backend update is in progress
        SlowBackend::wait_for(&backend.updates, 1).await;
        assert_eq!(store.pending_len(), 0);

        let report = store.flush_pending().await;
        assert_eq!(report, FlushReport::default());
        assert_eq!(backend.rows.get(original.id).unwrap().unwrap().title, "v1");
        assert_eq!(backend.rows.writes() - writes_before, 1);
        ticket.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn timer_after_flush_writes_nothing() {
        let (store, backend) = store_with(20);
        let original = seeded(&backend, task("v0", 1, 9));
        let writes_before = backend.writes();

        let ticket = store
            .update(Task {
                title: "v1".into(),
                ..original.clone()
            })
            .unwrap();
        assert_eq!(store.flush_pending().await.applied, 1);
        ticket.await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(backend.writes() - writes_before, 1);
        assert_eq!(store.pending_len(), 0);
    }

    #[tokio::test]
    async fn shutdown_flushes_and_clears() {
        let (store, backend) = store_with(60_000);
        let ticket = store.insert(task("a", 1, 8)).unwrap();
        let report = store.shutdown().await;
        assert_eq!(report.applied, 1);
        assert!(ticket.await.is_ok());
        assert_eq!(backend.len(), 1);
        assert_eq!(store.cache_stats().len, 0);
    }
}
