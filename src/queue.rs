//! Thread-safe URL priority queue (C4): a min-heap ordered by earliest-fetch time, with blocking
//! and non-blocking pop variants over a condition variable.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Where a queue entry originated, carried through for diagnostics and staleness ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTag {
    Seed,
    Sitemap,
    Link,
}

/// Whether a fetched row should be inserted fresh or update an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Insert,
    Update,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub url: String,
    pub retry_count: u32,
    pub upsert: UpsertKind,
    pub earliest_fetch: Instant,
    pub source: SourceTag,
    /// Monotonically increasing insertion sequence, used to break exact-time ties FIFO.
    seq: u64,
}

impl QueueEntry {
    pub fn new(url: String, earliest_fetch: Instant, source: SourceTag, upsert: UpsertKind) -> Self {
        Self {
            url,
            retry_count: 0,
            upsert,
            earliest_fetch,
            source,
            seq: 0,
        }
    }
}

// BinaryHeap is a max-heap; invert the comparison so the *earliest* fetch time (and, on ties, the
// *lowest* sequence number — FIFO) comes out first.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .earliest_fetch
            .cmp(&self.earliest_fetch)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.earliest_fetch == other.earliest_fetch && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}

struct Inner {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    shutdown: bool,
}

/// Thread-safe priority queue. `push` wakes one waiter; `shutdown` wakes all of them.
pub struct UrlQueue {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl Default for UrlQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                shutdown: false,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn push(&self, mut entry: QueueEntry) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        entry.seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(entry);
        self.cv.notify_one();
    }

    /// Non-blocking pop: returns the earliest-ready entry if the heap is non-empty, regardless of
    /// whether its `earliest_fetch` has arrived — callers that want to defer not-yet-ready
    /// entries should re-push them with an updated `earliest_fetch`.
    pub fn try_pop(&self) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.heap.pop()
    }

    /// Block up to `timeout` for an entry to arrive. Returns `None` on timeout or after shutdown.
    pub fn wait_and_pop(&self, timeout: Duration) -> Option<QueueEntry> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        loop {
            if inner.shutdown {
                return None;
            }
            if let Some(entry) = inner.heap.pop() {
                return Some(entry);
            }
            let (guard, result) = self
                .cv
                .wait_timeout(inner, timeout)
                .expect("queue cv wait poisoned");
            inner = guard;
            if result.timed_out() {
                return inner.heap.pop();
            }
        }
    }

    /// Wake all waiters; subsequent pops return `None` immediately.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.shutdown = true;
        self.cv.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
