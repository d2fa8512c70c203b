//! Progress reporter (C12): atomic counters with a throttled callback.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// A snapshot handed to the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub bytes_downloaded: u64,
    /// 0-100, or `-1` when the total queue size is unknown (link-following crawls).
    pub percent: i64,
}

/// Counters updated from worker threads, plus a minimum interval between callback invocations.
pub struct Progress {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    bytes_downloaded: AtomicU64,
    total_known: AtomicI64,
    last_reported: Mutex<Instant>,
    min_interval: Duration,
}

impl Progress {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            total_known: AtomicI64::new(-1),
            last_reported: Mutex::new(Instant::now() - min_interval),
            min_interval,
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total_known.store(total as i64, Ordering::SeqCst);
    }

    pub fn record_enqueued(&self, n: u64) {
        self.enqueued.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_completed(&self, bytes: u64) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let enqueued = self.enqueued.load(Ordering::SeqCst);
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let skipped = self.skipped.load(Ordering::SeqCst);
        let total = self.total_known.load(Ordering::SeqCst);
        let done = completed + failed + skipped;
        let percent = if total > 0 {
            ((done as f64 / total as f64) * 100.0).min(100.0) as i64
        } else {
            -1
        };
        ProgressSnapshot {
            enqueued,
            completed,
            failed,
            skipped,
            bytes_downloaded: self.bytes_downloaded.load(Ordering::SeqCst),
            percent,
        }
    }

    /// Invoke `callback` with the current snapshot, but only if at least `min_interval` has
    /// elapsed since the last invocation (or `force` is set, e.g. on final flush). The callback
    /// runs with the throttle lock held, so concurrent callers from different worker threads
    /// never invoke it at the same time.
    pub fn maybe_report(&self, force: bool, callback: &dyn Fn(ProgressSnapshot)) {
        let mut last = self.last_reported.lock().expect("progress lock poisoned");
        if !force && last.elapsed() < self.min_interval {
            return;
        }
        *last = Instant::now();
        callback(self.snapshot());
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn percent_is_negative_one_when_total_unknown() {
        let p = Progress::default();
        p.record_completed(10);
        assert_eq!(p.snapshot().percent, -1);
    }

    #[test]
    fn percent_computed_once_total_known() {
        let p = Progress::default();
        p.set_total(4);
        p.record_completed(1);
        p.record_completed(1);
        assert_eq!(p.snapshot().percent, 50);
    }

    #[test]
    fn counters_track_each_category() {
        let p = Progress::default();
        p.record_enqueued(5);
        p.record_completed(100);
        p.record_failed();
        p.record_skipped();
        let snap = p.snapshot();
        assert_eq!(snap.enqueued, 5);
        assert_eq!(snap.completed, 1);
        assert_eq!(snap.failed, 1);
        assert_eq!(snap.skipped, 1);
        assert_eq!(snap.bytes_downloaded, 100);
    }

    #[test]
    fn throttles_callback_invocations() {
        let p = Progress::new(Duration::from_secs(60));
        let calls = StdMutex::new(0u32);
        p.maybe_report(false, &|_| *calls.lock().unwrap() += 1);
        p.maybe_report(false, &|_| *calls.lock().unwrap() += 1);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn force_bypasses_throttle() {
        let p = Progress::new(Duration::from_secs(60));
        let calls = StdMutex::new(0u32);
        p.maybe_report(false, &|_| *calls.lock().unwrap() += 1);
        p.maybe_report(true, &|_| *calls.lock().unwrap() += 1);
        assert_eq!(*calls.lock().unwrap(), 2);
    }
}
