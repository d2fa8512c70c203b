//! Cancellation / shutdown (C11): a process-wide interrupt flag with double-signal hard exit.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const NOT_INTERRUPTED: u8 = 0;
const GRACEFUL: u8 = 1;

/// Shared interrupt handle. First call to [`Self::signal`] asks workers to wind down gracefully;
/// a second call within `hard_exit_window` tells the caller to terminate immediately instead of
/// waiting for in-flight requests to drain.
pub struct Interrupt {
    state: AtomicU8,
    signal_count: AtomicU32,
    first_signal_at: std::sync::Mutex<Option<Instant>>,
    hard_exit_window: Duration,
}

impl Interrupt {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(NOT_INTERRUPTED),
            signal_count: AtomicU32::new(0),
            first_signal_at: std::sync::Mutex::new(None),
            hard_exit_window: Duration::from_secs(3),
        })
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.load(Ordering::SeqCst) != NOT_INTERRUPTED
    }

    /// Record one interrupt signal. Returns `true` if this is the second signal within the
    /// hard-exit window (i.e. the caller should terminate the process immediately).
    pub fn signal(&self) -> bool {
        let now = Instant::now();
        let mut first = self.first_signal_at.lock().expect("interrupt lock poisoned");
        self.state.store(GRACEFUL, Ordering::SeqCst);
        self.signal_count.fetch_add(1, Ordering::SeqCst);

        match *first {
            None => {
                *first = Some(now);
                false
            }
            Some(t) if now.duration_since(t) <= self.hard_exit_window => true,
            Some(_) => {
                *first = Some(now);
                false
            }
        }
    }

    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninterrupted() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.is_interrupted());
    }

    #[test]
    fn first_signal_is_graceful() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.signal());
        assert!(interrupt.is_interrupted());
    }

    #[test]
    fn second_signal_within_window_is_hard_exit() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.signal());
        assert!(interrupt.signal());
    }

    #[test]
    fn second_signal_after_window_resets_to_graceful() {
        let interrupt = Arc::new(Interrupt {
            state: AtomicU8::new(NOT_INTERRUPTED),
            signal_count: AtomicU32::new(0),
            first_signal_at: std::sync::Mutex::new(None),
            hard_exit_window: Duration::from_millis(20),
        });
        assert!(!interrupt.signal());
        std::thread::sleep(Duration::from_millis(40));
        assert!(!interrupt.signal());
    }
}
