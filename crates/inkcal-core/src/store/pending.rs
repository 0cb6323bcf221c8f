//! Deferred writes with per-key coalescing.
//!
//! Each scheduled operation is stored under a [`PendingKey`]. Scheduling a
//! new operation under an occupied key supersedes the old one: its timer is
//! aborted and its waiters are carried over to the replacement.
//!
//! A write clock records when each task was last updated or deleted, so a
//! backend read that overlapped a write can tell its rows may be stale.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::task::{Task, TaskId};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// Operation tag used to coalesce deferred writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PendingKey {
    /// Inserts never coalesce; each gets its own tag.
    Insert(u64),
    Update(TaskId),
    Delete(TaskId),
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingKey::Insert(n) => write!(f, "insert:{n}"),
            PendingKey::Update(id) => write!(f, "update:{id}"),
            PendingKey::Delete(id) => write!(f, "delete:{id}"),
        }
    }
}

pub(crate) enum PendingOp {
    Insert { task: Task, reply: Reply<TaskId> },
    Update { task: Task, replies: Vec<Reply<()>> },
    Delete { id: TaskId, replies: Vec<Reply<()>> },
}

impl PendingOp {
    /// Waiters interested in a unit outcome. An insert's waiter is dropped,
    /// which resolves its ticket as cancelled.
    fn into_replies(self) -> Vec<Reply<()>> {
        match self {
            PendingOp::Update { replies, .. } | PendingOp::Delete { replies, .. } => replies,
            PendingOp::Insert { .. } => Vec::new(),
        }
    }
}

pub(crate) struct PendingEntry {
    pub seq: u64,
    pub op: PendingOp,
    pub timer: Option<JoinHandle<()>>,
}

impl PendingEntry {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
pub(crate) struct PendingWrites {
    entries: HashMap<PendingKey, PendingEntry>,
    next_seq: u64,
    next_insert: u64,
    // bumped when an update or delete is scheduled or applied
    clock: u64,
    changed: HashMap<TaskId, u64>,
}

impl PendingWrites {
    /// Sequence number recording scheduling order.
    pub fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub fn next_insert_key(&mut self) -> PendingKey {
        self.next_insert += 1;
        PendingKey::Insert(self.next_insert)
    }

    /// Record a write to `id`, scheduled or applied.
    pub fn mark_changed(&mut self, id: TaskId) {
        self.clock += 1;
        self.changed.insert(id, self.clock);
    }

    /// Current write clock. Take it before reading the backend.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    /// Whether `id` was written after the clock read `since`.
    pub fn changed_since(&self, id: TaskId, since: u64) -> bool {
        self.changed.get(&id).is_some_and(|&at| at > since)
    }

    pub fn insert(&mut self, key: PendingKey, entry: PendingEntry) {
        if let Some(mut previous) = self.entries.insert(key, entry) {
            // callers supersede first; never leave a stray timer running
            previous.cancel_timer();
        }
    }

    /// Remove the entry under `key` only if it is still the one scheduled as `seq`.
    pub fn take_if_current(&mut self, key: PendingKey, seq: u64) -> Option<PendingOp> {
        match self.entries.get(&key) {
            Some(entry) if entry.seq == seq => self.entries.remove(&key).map(|e| e.op),
            _ => None,
        }
    }

    /// Cancel the operations under `keys`, returning their waiters.
    pub fn supersede(&mut self, keys: &[PendingKey]) -> Vec<Reply<()>> {
        let mut replies = Vec::new();
        for key in keys {
            if let Some(mut entry) = self.entries.remove(key) {
                entry.cancel_timer();
                tracing::debug!("superseded pending {}", key);
                replies.extend(entry.op.into_replies());
            }
        }
        replies
    }

    /// Remove every entry, cancelling timers, in scheduling order.
    pub fn drain_ordered(&mut self) -> Vec<(PendingKey, PendingOp)> {
        let mut drained: Vec<(u64, PendingKey, PendingOp)> = self
            .entries
            .drain()
            .map(|(key, mut entry)| {
                entry.cancel_timer();
                (entry.seq, key, entry.op)
            })
            .collect();
        drained.sort_by_key(|(seq, _, _)| *seq);
        drained.into_iter().map(|(_, key, op)| (key, op)).collect()
    }

    /// Value of a not-yet-written update.
    pub fn pending_update(&self, id: TaskId) -> Option<&Task> {
        match self.entries.get(&PendingKey::Update(id)) {
            Some(PendingEntry {
                op: PendingOp::Update { task, .. },
                ..
            }) => Some(task),
            _ => None,
        }
    }

    pub fn pending_updates(&self) -> impl Iterator<Item = &Task> {
        self.entries.values().filter_map(|entry| match &entry.op {
            PendingOp::Update { task, .. } => Some(task),
            _ => None,
        })
    }

    pub fn has_pending_delete(&self, id: TaskId) -> bool {
        self.entries.contains_key(&PendingKey::Delete(id))
    }

    /// Keys in scheduling order.
    pub fn keys(&self) -> Vec<PendingKey> {
        let mut keys: Vec<_> = self.entries.iter().map(|(k, e)| (e.seq, *k)).collect();
        keys.sort_by_key(|(seq, _)| *seq);
        keys.into_iter().map(|(_, k)| k).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
