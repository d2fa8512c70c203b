//! Concurrent per-domain politeness state (C3).
//!
//! A coarse `RwLock` guards insertion/lookup into the outer map; each domain's own state lives
//! behind its own `Mutex` so that mutating one domain never blocks another. Workers take the
//! per-domain lock only for short critical sections — the atomic `last_crawl_time` reservation
//! (§4.7 step 5) is written and the lock released before the network call ever starts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Instant, SystemTime};

use crate::robots::Robots;

/// Politeness and health state tracked per authority (`host[:port]`).
pub struct DomainState {
    pub last_crawl_time: Option<Instant>,
    pub crawl_delay: f64,
    pub min_delay: f64,
    pub max_delay: f64,
    pub has_crawl_delay: bool,
    pub robots: Robots,
    pub robots_fetched: bool,
    pub robots_fetched_at: Option<SystemTime>,
    pub blocked_until: Option<Instant>,
    pub consecutive_errors: u32,
    pub active_requests: usize,
    pub ema_response_ms: f64,
    pub response_count: u32,
    pub urls_crawled: u64,
    pub urls_failed: u64,
    pub urls_skipped: u64,
}

impl DomainState {
    fn new(default_delay: f64, min_delay: f64, max_delay: f64) -> Self {
        Self {
            last_crawl_time: None,
            crawl_delay: default_delay,
            min_delay,
            max_delay,
            has_crawl_delay: false,
            robots: Robots::allow_all(),
            robots_fetched: false,
            robots_fetched_at: None,
            blocked_until: None,
            consecutive_errors: 0,
            active_requests: 0,
            ema_response_ms: 0.0,
            response_count: 0,
            urls_crawled: 0,
            urls_failed: 0,
            urls_skipped: 0,
        }
    }

    /// Is this domain currently within a retry/429 block window?
    pub fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.map_or(false, |b| b > now)
    }

    /// Record a successful fetch's response time into the adaptive EMA (§4.7 step 11), and
    /// auto-tune `crawl_delay` when this domain has its own explicit robots.txt delay.
    pub fn record_response_time(&mut self, elapsed_ms: f64) {
        self.response_count += 1;
        if self.response_count == 1 {
            self.ema_response_ms = elapsed_ms;
            return;
        }
        let prev_ema = self.ema_response_ms;
        self.ema_response_ms = 0.2 * elapsed_ms + 0.8 * prev_ema;

        if !self.has_crawl_delay || self.response_count <= 8 {
            return;
        }
        if elapsed_ms > 2.0 * prev_ema {
            self.crawl_delay = (self.crawl_delay * 1.5).min(self.max_delay);
        } else if elapsed_ms < 0.5 * prev_ema {
            self.crawl_delay = (self.crawl_delay * 0.9).max(self.min_delay);
        }
    }

    pub fn on_success(&mut self) {
        self.consecutive_errors = 0;
        self.blocked_until = None;
        self.urls_crawled += 1;
    }
}

/// Concurrent map from authority to [`DomainState`].
pub struct DomainTable {
    domains: RwLock<HashMap<String, Mutex<DomainState>>>,
    default_delay: f64,
    min_delay: f64,
    max_delay: f64,
}

impl DomainTable {
    pub fn new(default_delay: f64, min_delay: f64, max_delay: f64) -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
            default_delay,
            min_delay,
            max_delay,
        }
    }

    /// Run `f` against the domain's state, creating a fresh entry under the default policy if
    /// this is the first time `authority` has been seen.
    pub fn with_domain<R>(&self, authority: &str, f: impl FnOnce(&mut DomainState) -> R) -> R {
        // Fast path: the domain already exists, take only a read lock on the outer map.
        {
            let domains = self.domains.read().expect("domain table read lock poisoned");
            if let Some(state) = domains.get(authority) {
                let mut guard = lock_domain(state);
                return f(&mut guard);
            }
        }

        // Slow path: insert under a write lock, re-checking in case of a race.
        let mut domains = self.domains.write().expect("domain table write lock poisoned");
        let state = domains
            .entry(authority.to_string())
            .or_insert_with(|| Mutex::new(DomainState::new(self.default_delay, self.min_delay, self.max_delay)));
        let mut guard = lock_domain(state);
        f(&mut guard)
    }

    pub fn domain_count(&self) -> usize {
        self.domains.read().expect("domain table read lock poisoned").len()
    }
}

fn lock_domain(state: &Mutex<DomainState>) -> MutexGuard<'_, DomainState> {
    match state.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}
