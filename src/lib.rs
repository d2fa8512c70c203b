//! A polite, SQL-embedded web crawler with a concurrent, per-domain rate-limiting scheduler.
//!
//! [`crawl`] is the single entry point: seed URLs (or hostnames for sitemap-driven discovery) go
//! in, a [`CrawlOutcome`] summary comes out, and fetched rows are handed to a [`ResultSink`] as
//! they're batched. Everything else in this crate is a collaborator the pipeline depends on
//! through a trait, so a host can substitute its own transport, extractor, or sink.

pub mod backoff;
pub mod batch;
pub mod config;
pub mod discovery;
pub mod domain_state;
pub mod error;
pub mod extractor;
mod ffi;
pub mod fetch;
pub mod logging;
pub mod progress;
pub mod queue;
pub mod robots;
pub mod shutdown;
pub mod sink;
pub mod sitemap;
pub mod staleness;
pub mod transport;
pub mod url_normalize;
pub mod worker;

pub use ffi::*;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::batch::Batcher;
use crate::config::CrawlConfig;
use crate::discovery::SitemapCache;
use crate::domain_state::DomainTable;
use crate::error::CrawlResult;
use crate::extractor::{DefaultExtractor, Extractor};
use crate::progress::{Progress, ProgressSnapshot};
use crate::queue::{QueueEntry, SourceTag, UpsertKind};
use crate::shutdown::Interrupt;
use crate::sink::ResultSink;
use crate::staleness::Staleness;
use crate::transport::{HttpTransport, ReqwestTransport};
use crate::worker::WorkerContext;

/// One invocation of `CRAWL ... INTO` (§6): either explicit seed URLs, or hostnames to discover
/// via their sitemaps, or both.
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlRequest {
    #[serde(default)]
    pub seeds: Vec<String>,
    #[serde(default)]
    pub sites: Vec<String>,
    pub config: CrawlConfig,
}

/// Summary handed back to the host once a crawl finishes (§3).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlOutcome {
    pub rows_written: u64,
    pub rows_failed: u64,
    pub rows_skipped: u64,
    pub elapsed_ms: i64,
    pub error: Option<String>,
}

/// Run one crawl to completion on the calling thread, internally fanning out to the worker pool
/// described in §5. Collaborators default to [`ReqwestTransport`] and [`DefaultExtractor`]; use
/// [`crawl_with_collaborators`] to substitute either.
pub fn crawl(request: CrawlRequest, sink: &dyn ResultSink) -> CrawlResult<CrawlOutcome> {
    crawl_with_collaborators(
        request,
        sink,
        Arc::new(ReqwestTransport::default()),
        Arc::new(DefaultExtractor),
        None,
        Interrupt::new(),
    )
}

/// Same as [`crawl`], but with explicit transport/extractor collaborators, an optional throttled
/// progress callback (§4.12), and a caller-owned [`Interrupt`] handle a host can signal from
/// another thread to cancel the crawl.
#[allow(clippy::too_many_arguments)]
pub fn crawl_with_collaborators(
    request: CrawlRequest,
    sink: &dyn ResultSink,
    transport: Arc<dyn HttpTransport>,
    extractor: Arc<dyn Extractor>,
    progress_cb: Option<&(dyn Fn(ProgressSnapshot) + Sync)>,
    interrupt: Arc<Interrupt>,
) -> CrawlResult<CrawlOutcome> {
    let start = Instant::now();
    let config = Arc::new(request.config);

    info!(
        seeds = request.seeds.len(),
        sites = request.sites.len(),
        threads = config.threads,
        "starting crawl"
    );

    let queue = Arc::new(crate::queue::UrlQueue::new());
    let domains = Arc::new(DomainTable::new(
        config.default_crawl_delay,
        config.min_crawl_delay,
        config.max_crawl_delay,
    ));
    let progress = Arc::new(Progress::default());
    let batcher = Arc::new(Batcher::new(sink, config.batch_size));

    let mut enqueued: u64 = 0;
    for seed in &request.seeds {
        if let Some(normalized) = crate::url_normalize::normalize(seed) {
            queue.push(QueueEntry::new(
                normalized,
                Instant::now(),
                SourceTag::Seed,
                UpsertKind::Insert,
            ));
            enqueued += 1;
        }
    }

    if !request.sites.is_empty() {
        let cache = SitemapCache::new();
        let now = chrono::Utc::now();
        for site in &request.sites {
            fetch::ensure_robots_fetched("https", site, &config, &domains, transport.as_ref());
            let robots = domains.with_domain(site, |state| state.robots.clone());
            let discovered = discovery::discover_for_host(
                site,
                &robots,
                transport.as_ref(),
                &config.user_agent,
                &cache,
                config.sitemap_cache_hours,
                now,
            );
            info!(site, found = discovered.len(), "sitemap discovery finished");
            for item in discovered {
                let Some(normalized) = crate::url_normalize::normalize(&item.url) else {
                    continue;
                };
                if !config.url_filter.is_empty()
                    && !crate::url_normalize::matches_like_pattern(&normalized, &config.url_filter)
                {
                    continue;
                }

                let existing = sink.lookup_crawled_at(&normalized);
                let lastmod = item.lastmod.as_deref().and_then(crate::staleness::parse_lastmod);
                let verdict = crate::staleness::evaluate(existing, lastmod, item.changefreq.as_deref(), now);

                let upsert = match verdict {
                    Staleness::New => UpsertKind::Insert,
                    Staleness::Stale if config.update_stale => UpsertKind::Update,
                    Staleness::Stale | Staleness::Fresh => continue,
                };

                queue.push(QueueEntry::new(normalized, Instant::now(), SourceTag::Sitemap, upsert));
                enqueued += 1;
            }
        }
    }
    progress.record_enqueued(enqueued);
    progress.set_total(enqueued);

    let ctx = WorkerContext {
        queue: queue.clone(),
        domains,
        transport,
        extractor,
        config: config.clone(),
        progress: progress.clone(),
        interrupt: interrupt.clone(),
        batcher: batcher.clone(),
        progress_cb,
    };

    run_until_drained(ctx, &interrupt);

    if let Some(cb) = progress_cb {
        progress.maybe_report(true, cb);
    }

    let snapshot = progress.snapshot();
    info!(
        completed = snapshot.completed,
        failed = snapshot.failed,
        skipped = snapshot.skipped,
        "crawl finished"
    );

    Ok(CrawlOutcome {
        rows_written: snapshot.completed,
        rows_failed: snapshot.failed,
        rows_skipped: snapshot.skipped,
        elapsed_ms: start.elapsed().as_millis() as i64,
        error: None,
    })
}

/// Drive the worker pool until the queue is empty, then signal shutdown so workers exit. A
/// watcher thread declares the crawl done once the queue has stayed empty across two checks,
/// giving in-flight politeness waits and retries a chance to re-queue before the pool winds down.
fn run_until_drained(ctx: WorkerContext<'_>, interrupt: &Arc<Interrupt>) {
    let queue_for_watch = ctx.queue.clone();
    let interrupt_for_watch = interrupt.clone();
    let watcher = std::thread::spawn(move || loop {
        std::thread::sleep(std::time::Duration::from_millis(100));
        if queue_for_watch.is_empty() {
            std::thread::sleep(std::time::Duration::from_millis(300));
            if queue_for_watch.is_empty() {
                interrupt_for_watch.signal();
                break;
            }
        }
    });

    worker::run_pool(ctx);
    let _ = watcher.join();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;
    use crate::transport::FetchResponse;
    use std::collections::HashMap;

    struct EmptyTransport;
    impl HttpTransport for EmptyTransport {
        fn fetch(
            &self,
            url: &str,
            _user_agent: &str,
            _headers: &HashMap<String, String>,
            _timeout_ms: u64,
            _max_bytes: u64,
        ) -> FetchResponse {
            FetchResponse {
                status: 200,
                body: b"<html></html>".to_vec(),
                content_type: "text/html".to_string(),
                headers: HashMap::new(),
                final_url: url.to_string(),
                redirect_count: 0,
                elapsed_ms: 1,
                etag: None,
                last_modified: None,
                server_date: None,
                error: None,
            }
        }
    }

    #[test]
    fn crawl_with_no_seeds_or_sites_finishes_immediately() {
        let sink = InMemorySink::new();
        let request = CrawlRequest {
            seeds: vec![],
            sites: vec![],
            config: CrawlConfig::from_json(r#"{"user_agent": "TestBot/1.0", "threads": 1}"#).unwrap(),
        };
        let outcome = crawl_with_collaborators(
            request,
            &sink,
            Arc::new(EmptyTransport),
            Arc::new(DefaultExtractor),
            None,
            Interrupt::new(),
        )
        .unwrap();
        assert_eq!(outcome.rows_written, 0);
        assert!(outcome.error.is_none());
    }

    struct MapTransport {
        responses: HashMap<String, FetchResponse>,
    }

    impl HttpTransport for MapTransport {
        fn fetch(
            &self,
            url: &str,
            _user_agent: &str,
            _headers: &HashMap<String, String>,
            _timeout_ms: u64,
            _max_bytes: u64,
        ) -> FetchResponse {
            self.responses
                .get(url)
                .cloned()
                .unwrap_or_else(|| FetchResponse::transport_error("no scripted response", 1))
        }
    }

    fn xml_response(body: String) -> FetchResponse {
        FetchResponse {
            status: 200,
            body: body.into_bytes(),
            content_type: "application/xml".to_string(),
            headers: HashMap::new(),
            final_url: String::new(),
            redirect_count: 0,
            elapsed_ms: 1,
            etag: None,
            last_modified: None,
            server_date: None,
            error: None,
        }
    }

    fn html_response() -> FetchResponse {
        FetchResponse {
            status: 200,
            body: b"<html></html>".to_vec(),
            content_type: "text/html".to_string(),
            headers: HashMap::new(),
            final_url: String::new(),
            redirect_count: 0,
            elapsed_ms: 1,
            etag: None,
            last_modified: None,
            server_date: None,
            error: None,
        }
    }

    fn robots_allow_all() -> FetchResponse {
        FetchResponse {
            status: 200,
            body: b"User-agent: *\nAllow: /\n".to_vec(),
            content_type: "text/plain".to_string(),
            headers: HashMap::new(),
            final_url: String::new(),
            redirect_count: 0,
            elapsed_ms: 1,
            etag: None,
            last_modified: None,
            server_date: None,
            error: None,
        }
    }

    #[test]
    fn url_filter_restricts_sitemap_discovery_to_matching_urls() {
        let sitemap = "<urlset>\
            <url><loc>https://example.com/product/1</loc></url>\
            <url><loc>https://example.com/product/2</loc></url>\
            <url><loc>https://example.com/product/3</loc></url>\
            <url><loc>https://example.com/product/4</loc></url>\
            <url><loc>https://example.com/about</loc></url>\
            <url><loc>https://example.com/contact</loc></url>\
        </urlset>"
            .to_string();

        let mut responses = HashMap::new();
        responses.insert("https://example.com/robots.txt".to_string(), robots_allow_all());
        responses.insert("https://example.com/sitemap.xml".to_string(), xml_response(sitemap));
        for n in 1..=4 {
            responses.insert(
                format!("https://example.com/product/{n}"),
                html_response(),
            );
        }
        let transport = MapTransport { responses };

        let sink = InMemorySink::new();
        let request = CrawlRequest {
            seeds: vec![],
            sites: vec!["example.com".to_string()],
            config: CrawlConfig::from_json(
                r#"{"user_agent": "TestBot/1.0", "threads": 1, "url_filter": "%/product/%"}"#,
            )
            .unwrap(),
        };
        let outcome = crawl_with_collaborators(
            request,
            &sink,
            Arc::new(transport),
            Arc::new(DefaultExtractor),
            None,
            Interrupt::new(),
        )
        .unwrap();
        assert_eq!(outcome.rows_written, 4);
        assert_eq!(sink.rows_snapshot().len(), 4);
    }

    #[test]
    fn rerunning_the_same_sites_crawl_enqueues_nothing_new() {
        let sitemap = "<urlset><url><loc>https://example.com/a</loc><lastmod>2024-01-01</lastmod></url></urlset>".to_string();
        let mut responses = HashMap::new();
        responses.insert("https://example.com/robots.txt".to_string(), robots_allow_all());
        responses.insert("https://example.com/sitemap.xml".to_string(), xml_response(sitemap));
        responses.insert("https://example.com/a".to_string(), html_response());
        let transport = Arc::new(MapTransport { responses });

        let sink = InMemorySink::new();
        let make_request = || CrawlRequest {
            seeds: vec![],
            sites: vec!["example.com".to_string()],
            config: CrawlConfig::from_json(r#"{"user_agent": "TestBot/1.0", "threads": 1}"#).unwrap(),
        };

        let first = crawl_with_collaborators(
            make_request(),
            &sink,
            transport.clone(),
            Arc::new(DefaultExtractor),
            None,
            Interrupt::new(),
        )
        .unwrap();
        assert_eq!(first.rows_written, 1);

        let second = crawl_with_collaborators(
            make_request(),
            &sink,
            transport,
            Arc::new(DefaultExtractor),
            None,
            Interrupt::new(),
        )
        .unwrap();
        assert_eq!(second.rows_written, 0);
        assert_eq!(sink.rows_snapshot().len(), 1);
    }

    #[test]
    fn crawl_with_a_seed_produces_one_row() {
        let sink = InMemorySink::new();
        let request = CrawlRequest {
            seeds: vec!["http://example.com/".to_string()],
            sites: vec![],
            config: CrawlConfig::from_json(
                r#"{"user_agent": "TestBot/1.0", "threads": 1, "respect_robots_txt": false}"#,
            )
            .unwrap(),
        };
        let outcome = crawl_with_collaborators(
            request,
            &sink,
            Arc::new(EmptyTransport),
            Arc::new(DefaultExtractor),
            None,
            Interrupt::new(),
        )
        .unwrap();
        assert_eq!(outcome.rows_written, 1);
        assert_eq!(sink.rows_snapshot().len(), 1);
    }
}
