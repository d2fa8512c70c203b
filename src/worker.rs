//! Worker pool (C9): a fixed set of OS threads pulling from the URL queue, each bounded by a
//! global connection semaphore, feeding the batcher and progress reporter until shutdown.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::info;

use crate::batch::Batcher;
use crate::config::CrawlConfig;
use crate::domain_state::DomainTable;
use crate::extractor::Extractor;
use crate::fetch::{self, FetchOutcome};
use crate::progress::{Progress, ProgressSnapshot};
use crate::queue::UrlQueue;
use crate::shutdown::Interrupt;
use crate::transport::HttpTransport;

const POLL_TIMEOUT: Duration = Duration::from_millis(250);

/// A plain counting semaphore over `std::sync::{Mutex, Condvar}` — the standard library has no
/// built-in one, and reaching for a channel-of-units permit would obscure the acquire/release
/// pairing this needs around each HTTP call.
struct Semaphore {
    state: Mutex<usize>,
    cv: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits),
            cv: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut guard = self.state.lock().expect("semaphore lock poisoned");
        while *guard == 0 {
            guard = self.cv.wait(guard).expect("semaphore cv wait poisoned");
        }
        *guard -= 1;
    }

    fn release(&self) {
        let mut guard = self.state.lock().expect("semaphore lock poisoned");
        *guard += 1;
        self.cv.notify_one();
    }
}

/// Everything workers need, shared behind `Arc`s so the pool can spawn freely.
pub struct WorkerContext<'a> {
    pub queue: Arc<UrlQueue>,
    pub domains: Arc<DomainTable>,
    pub transport: Arc<dyn HttpTransport>,
    pub extractor: Arc<dyn Extractor>,
    pub config: Arc<CrawlConfig>,
    pub progress: Arc<Progress>,
    pub interrupt: Arc<Interrupt>,
    pub batcher: Arc<Batcher<'a>>,
    /// §4.12 periodic progress callback, invoked (throttled) as rows complete. `None` when the
    /// host registered no callback.
    pub progress_cb: Option<&'a (dyn Fn(ProgressSnapshot) + Sync)>,
}

/// Run the worker pool to completion: spawn `config.threads` workers, block until the queue is
/// drained or the crawl is interrupted, then join everyone and flush the final partial batch.
pub fn run_pool(ctx: WorkerContext<'_>) {
    let semaphore = Arc::new(Semaphore::new(ctx.config.max_total_connections));
    info!(threads = ctx.config.threads, "starting worker pool");

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for worker_id in 0..ctx.config.threads {
            let queue = ctx.queue.clone();
            let domains = ctx.domains.clone();
            let transport = ctx.transport.clone();
            let extractor = ctx.extractor.clone();
            let config = ctx.config.clone();
            let progress = ctx.progress.clone();
            let interrupt = ctx.interrupt.clone();
            let batcher = &ctx.batcher;
            let progress_cb = ctx.progress_cb;
            let semaphore = semaphore.clone();

            handles.push(scope.spawn(move || {
                worker_loop(
                    worker_id, queue, domains, transport, extractor, config, progress, interrupt,
                    batcher, progress_cb, semaphore,
                );
            }));
        }
        for handle in handles {
            let _ = handle.join();
        }
    });

    if let Err(e) = ctx.batcher.flush() {
        tracing::warn!(error = %e, "failed to flush final batch");
    }
    info!("worker pool finished");
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    worker_id: usize,
    queue: Arc<UrlQueue>,
    domains: Arc<DomainTable>,
    transport: Arc<dyn HttpTransport>,
    extractor: Arc<dyn Extractor>,
    config: Arc<CrawlConfig>,
    progress: Arc<Progress>,
    interrupt: Arc<Interrupt>,
    batcher: &Batcher<'_>,
    progress_cb: Option<&(dyn Fn(ProgressSnapshot) + Sync)>,
    semaphore: Arc<Semaphore>,
) {
    loop {
        if interrupt.is_interrupted() && queue.is_empty() {
            break;
        }

        let Some(entry) = queue.wait_and_pop(POLL_TIMEOUT) else {
            if interrupt.is_interrupted() {
                break;
            }
            continue;
        };

        semaphore.acquire();
        let outcome = fetch::run_one(entry, &config, &domains, transport.as_ref(), extractor.as_ref());
        semaphore.release();

        match outcome {
            FetchOutcome::Record(record) => {
                let bytes = record.body.len() as u64;
                let failed = record.error.is_some();
                if failed {
                    progress.record_failed();
                } else {
                    progress.record_completed(bytes);
                }
                if let Err(e) = batcher.push(record) {
                    tracing::warn!(worker_id, error = %e, "failed to buffer result row");
                }
                if let Some(cb) = progress_cb {
                    progress.maybe_report(false, cb);
                }
            }
            FetchOutcome::Requeue(requeued) => {
                queue.push(requeued);
            }
            FetchOutcome::Drop => {
                progress.record_skipped();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semaphore_blocks_until_released() {
        let sem = Arc::new(Semaphore::new(1));
        sem.acquire();
        let sem2 = sem.clone();
        let handle = std::thread::spawn(move || {
            sem2.acquire();
            "acquired"
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        sem.release();
        assert_eq!(handle.join().unwrap(), "acquired");
    }

    #[test]
    fn semaphore_allows_up_to_permit_count_concurrently() {
        let sem = Arc::new(Semaphore::new(2));
        sem.acquire();
        sem.acquire();
        let sem2 = sem.clone();
        let handle = std::thread::spawn(move || {
            sem2.acquire();
            "acquired"
        });
        std::thread::sleep(Duration::from_millis(30));
        assert!(!handle.is_finished());
        sem.release();
        assert_eq!(handle.join().unwrap(), "acquired");
    }
}
