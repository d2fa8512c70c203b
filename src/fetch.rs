//! Fetch pipeline (C7): the per-URL orchestration tying together domain politeness state,
//! robots.txt, the retry/backoff engine, the HTTP transport, and the extraction collaborator.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};

use chrono::Utc;
use rand::Rng;
use tracing::debug;
use url::Url;

use crate::backoff::{classify_status, fib_backoff, parse_retry_after, should_drop_after_retries, ErrorClass, Outcome};
use crate::config::CrawlConfig;
use crate::domain_state::DomainTable;
use crate::extractor::Extractor;
use crate::queue::QueueEntry;
use crate::robots::Robots;
use crate::sink::ResultRecord;
use crate::transport::{self, HttpTransport};
use crate::url_normalize;

/// What to do with a queue entry once the fetch pipeline has processed it.
pub enum FetchOutcome {
    /// A row is ready to persist.
    Record(ResultRecord),
    /// Re-queue unchanged, deferred to `entry.earliest_fetch` (blocked domain, parallelism cap).
    Requeue(QueueEntry),
    /// No row and nothing to re-queue (e.g. malformed URL).
    Drop,
}

const JITTER_MILLIS_RANGE: std::ops::Range<u64> = 10..100;

/// Run one queue entry through the full pipeline (§4.7). `transport` and `extractor` are shared
/// collaborators; `domains` holds per-authority politeness state.
pub fn run_one(
    entry: QueueEntry,
    config: &CrawlConfig,
    domains: &DomainTable,
    transport: &dyn HttpTransport,
    extractor: &dyn Extractor,
) -> FetchOutcome {
    let Ok(parsed) = Url::parse(&entry.url) else {
        return FetchOutcome::Drop;
    };
    let Some(host) = parsed.host_str() else {
        return FetchOutcome::Drop;
    };
    let authority = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };

    let now = Instant::now();

    // Step 2: blocked-domain deferral never counts as a retry.
    let blocked_until = domains.with_domain(&authority, |state| {
        if state.is_blocked(now) {
            state.blocked_until
        } else {
            None
        }
    });
    if let Some(blocked_until) = blocked_until {
        let mut requeued = entry;
        requeued.earliest_fetch = blocked_until;
        return FetchOutcome::Requeue(requeued);
    }

    // Steps 3-4: robots.txt fetch-if-needed and consult.
    if config.respect_robots_txt {
        ensure_robots_fetched(parsed.scheme(), &authority, config, domains, transport);
        let path = path_and_query(&parsed);
        let disallowed = domains.with_domain(&authority, |state| {
            !state.robots.is_allowed(&path, &config.user_agent)
        });
        if disallowed {
            if config.log_skipped {
                return FetchOutcome::Record(disallowed_record(&entry.url));
            }
            return FetchOutcome::Drop;
        }
    }

    // Steps 5-6: politeness slot reservation or parallelism cap check.
    let reservation = reserve_slot(&authority, config, domains, now);
    match reservation {
        Reservation::Wait(until) => {
            let mut requeued = entry;
            requeued.earliest_fetch = until;
            return FetchOutcome::Requeue(requeued);
        }
        Reservation::ParallelCapFull => {
            let jitter = rand::thread_rng().gen_range(JITTER_MILLIS_RANGE);
            let mut requeued = entry;
            requeued.earliest_fetch = now + Duration::from_millis(jitter);
            return FetchOutcome::Requeue(requeued);
        }
        Reservation::Acquired { via_parallel_slot } => {
            let record = do_fetch(&entry, &authority, config, domains, transport, extractor, now);
            if via_parallel_slot {
                domains.with_domain(&authority, |state| {
                    state.active_requests = state.active_requests.saturating_sub(1);
                });
            }
            record
        }
    }
}

enum Reservation {
    Wait(Instant),
    ParallelCapFull,
    Acquired { via_parallel_slot: bool },
}

/// Either claim the crawl-delay slot (writing `last_crawl_time` before the network call, per the
/// politeness invariant), or claim a parallelism-cap slot when no explicit delay applies.
fn reserve_slot(authority: &str, config: &CrawlConfig, domains: &DomainTable, now: Instant) -> Reservation {
    domains.with_domain(authority, |state| {
        if state.has_crawl_delay {
            let ready_at = state
                .last_crawl_time
                .map(|t| t + Duration::from_secs_f64(state.crawl_delay))
                .unwrap_or(now);
            if ready_at > now {
                return Reservation::Wait(ready_at);
            }
            state.last_crawl_time = Some(now);
            Reservation::Acquired { via_parallel_slot: false }
        } else if state.active_requests >= config.max_parallel_per_domain {
            Reservation::ParallelCapFull
        } else {
            state.active_requests += 1;
            state.last_crawl_time = Some(now);
            Reservation::Acquired { via_parallel_slot: true }
        }
    })
}

/// Fetch and cache robots.txt for `authority` if not already done. Takes a bare `scheme` rather
/// than a parsed URL so callers without a specific request URL (e.g. CRAWL SITES discovery, which
/// only has a hostname) can drive the same fetch/parse/cache path as the per-URL pipeline.
pub(crate) fn ensure_robots_fetched(
    scheme: &str,
    authority: &str,
    config: &CrawlConfig,
    domains: &DomainTable,
    transport: &dyn HttpTransport,
) {
    let needs_fetch = domains.with_domain(authority, |state| !state.robots_fetched);
    if !needs_fetch {
        return;
    }

    let robots_url = format!("{scheme}://{authority}/robots.txt");
    let response = transport.fetch(&robots_url, &config.user_agent, &HashMap::new(), 10_000, 1024 * 1024);
    let robots = if response.status == 200 {
        Robots::parse(&String::from_utf8_lossy(&response.body))
    } else {
        Robots::allow_all()
    };

    domains.with_domain(authority, |state| {
        let (delay, has_delay) = robots.effective_delay(
            &config.user_agent,
            config.default_crawl_delay,
            config.min_crawl_delay,
            config.max_crawl_delay,
        );
        state.robots = robots.clone();
        state.robots_fetched = true;
        state.robots_fetched_at = Some(SystemTime::now());
        state.crawl_delay = delay;
        state.has_crawl_delay = has_delay;
    });
}

/// Case-insensitive header lookup: `reqwest` header names aren't guaranteed to come back in any
/// particular case by the time they land in `FetchResponse.headers`.
fn header_lookup<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

fn disallowed_record(url: &str) -> ResultRecord {
    let surt_key = url_normalize::normalize(url)
        .and_then(|n| url_normalize::surt(&n))
        .unwrap_or_default();
    ResultRecord {
        url: url.to_string(),
        surt_key,
        http_status: -1,
        body: String::new(),
        content_type: String::new(),
        elapsed_ms: 0,
        crawled_at: Utc::now().to_rfc3339(),
        error: Some("disallowed by robots.txt".to_string()),
        error_type: ErrorClass::RobotsDisallowed.as_str().to_string(),
        etag: None,
        last_modified: None,
        content_hash: None,
        final_url: url.to_string(),
        redirect_count: 0,
        jsonld: None,
        opengraph: None,
        meta: None,
        hydration: None,
        js: None,
    }
}

fn do_fetch(
    entry: &QueueEntry,
    authority: &str,
    config: &CrawlConfig,
    domains: &DomainTable,
    transport: &dyn HttpTransport,
    extractor: &dyn Extractor,
    now: Instant,
) -> FetchOutcome {
    let response = transport.fetch(
        &entry.url,
        &config.user_agent,
        &HashMap::new(),
        config.timeout_seconds * 1000,
        config.max_response_bytes,
    );

    let outcome = classify_status(response.status);

    match outcome {
        Outcome::Retryable(class) => {
            let consecutive_errors = domains.with_domain(authority, |state| {
                state.consecutive_errors += 1;
                state.urls_failed += 1;
                state.consecutive_errors
            });
            debug!(url = %entry.url, class = class.as_str(), "retryable fetch failure");

            let next_retry_count = entry.retry_count + 1;
            if should_drop_after_retries(next_retry_count) {
                return FetchOutcome::Record(error_record(entry, &response, class));
            }

            let delay = header_lookup(&response.headers, "retry-after")
                .and_then(|v| parse_retry_after(v, Utc::now()))
                .unwrap_or_else(|| fib_backoff(consecutive_errors, config.max_retry_backoff_seconds));
            let blocked_until = now + delay;
            domains.with_domain(authority, |state| {
                state.blocked_until = Some(blocked_until);
            });

            let mut requeued = entry.clone();
            requeued.retry_count = next_retry_count;
            requeued.earliest_fetch = blocked_until;
            FetchOutcome::Requeue(requeued)
        }
        Outcome::Permanent(class) => {
            domains.with_domain(authority, |state| state.urls_failed += 1);
            FetchOutcome::Record(error_record(entry, &response, class))
        }
        Outcome::Success => {
            domains.with_domain(authority, |state| {
                state.record_response_time(response.elapsed_ms as f64);
                state.on_success();
            });

            if !content_type_allowed(&response.content_type, config) {
                return FetchOutcome::Record(rejected_content_type_record(entry, &response));
            }
            if response.body.len() as u64 > config.max_response_bytes {
                return FetchOutcome::Record(oversized_record(entry, &response));
            }

            let crawled_at = resolve_crawled_at(&response.server_date);
            let body_text = String::from_utf8_lossy(&response.body).into_owned();
            let is_html = response.content_type.to_lowercase().contains("html");
            let fields = if is_html {
                Some(extractor.extract(&body_text))
            } else {
                None
            };

            let surt_key = url_normalize::normalize(&entry.url)
                .and_then(|n| url_normalize::surt(&n))
                .unwrap_or_default();

            let body = if fields.as_ref().map_or(false, |f| f.noindex) {
                String::new()
            } else {
                body_text
            };

            FetchOutcome::Record(ResultRecord {
                url: entry.url.clone(),
                surt_key,
                http_status: response.status,
                body,
                content_type: response.content_type,
                elapsed_ms: response.elapsed_ms,
                crawled_at,
                error: None,
                error_type: ErrorClass::None.as_str().to_string(),
                etag: response.etag,
                last_modified: response.last_modified,
                content_hash: None,
                final_url: response.final_url,
                redirect_count: response.redirect_count,
                jsonld: fields.as_ref().and_then(|f| f.jsonld.clone()),
                opengraph: fields.as_ref().and_then(|f| f.opengraph.clone()),
                meta: fields.as_ref().and_then(|f| f.meta.clone()),
                hydration: fields.as_ref().and_then(|f| f.hydration.clone()),
                js: fields.as_ref().and_then(|f| f.js.clone()),
            })
        }
    }
}

/// Use the server's `Date` header as `crawled_at` if within ±15 minutes of the local clock,
/// otherwise fall back to local now (§4.7 step 8) — guards against a clock-skewed or lying host.
fn resolve_crawled_at(server_date: &Option<String>) -> String {
    let now = Utc::now();
    if let Some(raw) = server_date {
        if let Some(parsed) = transport::parse_http_date(raw) {
            let delta = (parsed - now).num_minutes().abs();
            if delta <= 15 {
                return parsed.to_rfc3339();
            }
        }
    }
    now.to_rfc3339()
}

fn content_type_allowed(content_type: &str, config: &CrawlConfig) -> bool {
    let ct = content_type.split(';').next().unwrap_or("").trim().to_lowercase();
    if !config.accept_content_types.trim().is_empty()
        && !matches_any_pattern(&ct, &config.accept_content_types)
    {
        return false;
    }
    if !config.reject_content_types.trim().is_empty()
        && matches_any_pattern(&ct, &config.reject_content_types)
    {
        return false;
    }
    true
}

fn matches_any_pattern(content_type: &str, patterns: &str) -> bool {
    patterns.split(',').map(str::trim).any(|pattern| {
        if let Some(prefix) = pattern.strip_suffix("/*") {
            content_type.starts_with(prefix)
        } else {
            content_type == pattern
        }
    })
}

fn error_record(entry: &QueueEntry, response: &transport::FetchResponse, class: ErrorClass) -> ResultRecord {
    let surt_key = url_normalize::normalize(&entry.url)
        .and_then(|n| url_normalize::surt(&n))
        .unwrap_or_default();
    ResultRecord {
        url: entry.url.clone(),
        surt_key,
        http_status: response.status,
        body: String::new(),
        content_type: response.content_type.clone(),
        elapsed_ms: response.elapsed_ms,
        crawled_at: Utc::now().to_rfc3339(),
        error: response.error.clone().or_else(|| Some(class.as_str().to_string())),
        error_type: class.as_str().to_string(),
        etag: None,
        last_modified: None,
        content_hash: None,
        final_url: if response.final_url.is_empty() {
            entry.url.clone()
        } else {
            response.final_url.clone()
        },
        redirect_count: response.redirect_count,
        jsonld: None,
        opengraph: None,
        meta: None,
        hydration: None,
        js: None,
    }
}

fn rejected_content_type_record(entry: &QueueEntry, response: &transport::FetchResponse) -> ResultRecord {
    let mut record = error_record(entry, response, ErrorClass::ContentTypeRejected);
    record.error = Some("content-type rejected by accept/reject filters".to_string());
    record
}

fn oversized_record(entry: &QueueEntry, response: &transport::FetchResponse) -> ResultRecord {
    let mut record = error_record(entry, response, ErrorClass::ContentTooLarge);
    record.error = Some("response exceeded max_response_bytes".to_string());
    record
}
