//! Rolling log of the most recent transform outcomes.
//!
//! The log is created once at startup, shared behind an `Arc`, and appended
//! to by every transform. It never holds more than its capacity; the oldest
//! entry is evicted first. Appends are serialized by a mutex, so racing
//! transforms may interleave but never lose an entry.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::TransformLogEntry;

pub struct TransformLog {
    capacity: usize,
    entries: Mutex<VecDeque<TransformLogEntry>>,
}

impl TransformLog {
    /// Create an empty log. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn append(&self, entry: TransformLogEntry) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Snapshot of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<TransformLogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while holding the lock cannot leave the deque half-written,
    // so a poisoned lock is still safe to use.
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<TransformLogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TransformLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
