//! Sitemap discovery (C5): cache lookup, robots.txt `Sitemap:` directives, a bruteforce path
//! list, and bounded recursive sitemap-index expansion.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::robots::Robots;
use crate::sitemap::{self, SitemapEntry};
use crate::transport::HttpTransport;

const BRUTEFORCE_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemap.xml.gz",
    "/sitemap/sitemap.xml",
    "/sitemaps/sitemap.xml",
    "/sitemap1.xml",
    "/wp-sitemap.xml",
    "/sitemap/",
    "/sitemap_index.xml.gz",
    "/sitemap-pages.xml",
    "/sitemap-posts.xml",
    "/post-sitemap.xml",
];

const DEFAULT_MAX_INDEX_DEPTH: u32 = 4;

/// One cached/discovered sitemap URL, ready to enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredUrl {
    pub url: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
    pub discovered_at: DateTime<Utc>,
}

/// A single (hostname, url) cache row, matching the persisted cache table's shape (§4.5, §4.14).
#[derive(Debug, Clone)]
struct CacheEntry {
    entries: Vec<DiscoveredUrl>,
    discovered_at: DateTime<Utc>,
}

/// In-process sitemap cache, keyed by hostname. A host implementation backed by the SQL engine's
/// own cache table can substitute a different `SitemapCache` without touching discovery logic.
#[derive(Default)]
pub struct SitemapCache {
    by_host: Mutex<HashMap<String, CacheEntry>>,
}

impl SitemapCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, host: &str, cache_hours: i64, now: DateTime<Utc>) -> Option<Vec<DiscoveredUrl>> {
        let guard = self.by_host.lock().expect("sitemap cache lock poisoned");
        let entry = guard.get(host)?;
        let age = now - entry.discovered_at;
        if age > chrono::Duration::hours(cache_hours) {
            return None;
        }
        if entry.entries.is_empty() {
            return None;
        }
        Some(entry.entries.clone())
    }

    fn put(&self, host: &str, entries: Vec<DiscoveredUrl>, now: DateTime<Utc>) {
        let mut guard = self.by_host.lock().expect("sitemap cache lock poisoned");
        guard.insert(
            host.to_string(),
            CacheEntry {
                entries,
                discovered_at: now,
            },
        );
    }
}

/// Discover sitemap URLs for one hostname (§4.5 steps 1-5). `now` is supplied by the caller so
/// tests can control staleness deterministically.
pub fn discover_for_host(
    host: &str,
    robots: &Robots,
    transport: &dyn HttpTransport,
    user_agent: &str,
    cache: &SitemapCache,
    cache_hours: i64,
    now: DateTime<Utc>,
) -> Vec<DiscoveredUrl> {
    if let Some(cached) = cache.get(host, cache_hours, now) {
        return cached;
    }

    let candidates = candidate_sitemap_urls(host, robots);
    let mut visited = HashSet::new();
    let mut discovered = Vec::new();

    for candidate in candidates {
        expand_sitemap(
            &candidate,
            transport,
            user_agent,
            DEFAULT_MAX_INDEX_DEPTH,
            &mut visited,
            &mut discovered,
            now,
        );
        if !discovered.is_empty() {
            break;
        }
    }

    cache.put(host, discovered.clone(), now);
    discovered
}

/// Build the ordered candidate list: robots.txt `Sitemap:` directives first, then the bruteforce
/// path list as a fallback if robots.txt named none.
fn candidate_sitemap_urls(host: &str, robots: &Robots) -> Vec<String> {
    if !robots.sitemaps.is_empty() {
        return robots.sitemaps.clone();
    }
    let scheme_host = format!("https://{host}");
    BRUTEFORCE_PATHS
        .iter()
        .map(|path| format!("{scheme_host}{path}"))
        .collect()
}

/// Fetch and recursively expand one sitemap/sitemap-index URL into `discovered`, bounded by
/// `depth` and deduplicated via `visited`.
fn expand_sitemap(
    url: &str,
    transport: &dyn HttpTransport,
    user_agent: &str,
    depth: u32,
    visited: &mut HashSet<String>,
    discovered: &mut Vec<DiscoveredUrl>,
    now: DateTime<Utc>,
) {
    if depth == 0 || !visited.insert(url.to_string()) {
        return;
    }

    let response = transport.fetch(url, user_agent, &HashMap::new(), 30_000, 50 * 1024 * 1024);
    if response.status != 200 {
        warn!(url, status = response.status, "sitemap fetch did not return 200");
        return;
    }

    let text = sitemap::decode_body(&response.body);
    let parsed = sitemap::parse_sitemap(&text);
    for err in &parsed.errors {
        warn!(url, error = %err, "sitemap parse error, continuing with partial entries");
    }

    for entry in parsed.urls {
        discovered.push(to_discovered(entry, now));
    }

    for index_entry in parsed.sitemaps {
        expand_sitemap(
            &index_entry.url,
            transport,
            user_agent,
            depth - 1,
            visited,
            discovered,
            now,
        );
    }
}

fn to_discovered(entry: SitemapEntry, discovered_at: DateTime<Utc>) -> DiscoveredUrl {
    DiscoveredUrl {
        url: entry.url,
        lastmod: entry.lastmod,
        changefreq: entry.changefreq,
        priority: entry.priority,
        discovered_at,
    }
}
