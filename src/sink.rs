//! Host store collaborator (§6): the single-writer result sink a crawl persists batches into.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One persisted (or to-be-persisted) crawl result row.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRecord {
    pub url: String,
    pub surt_key: String,
    pub http_status: i32,
    pub body: String,
    pub content_type: String,
    pub elapsed_ms: i64,
    pub crawled_at: String,
    pub error: Option<String>,
    pub error_type: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_hash: Option<String>,
    pub final_url: String,
    pub redirect_count: u32,
    pub jsonld: Option<String>,
    pub opengraph: Option<String>,
    pub meta: Option<String>,
    pub hydration: Option<String>,
    pub js: Option<String>,
}

/// The host store's single-writer batch-insert contract. Implementations must accept batches of
/// up to `batch_size` rows and perform a transactional INSERT/MERGE.
pub trait ResultSink: Send + Sync {
    fn write_batch(&self, rows: &[ResultRecord]) -> Result<(), String>;

    /// Look up when `url` was last crawled, so the staleness evaluator (§4.6) can decide whether
    /// a sitemap-discovered URL needs a fresh fetch. `None` means "treat as new" — no prior row,
    /// or this sink has no way to answer lookups.
    fn lookup_crawled_at(&self, url: &str) -> Option<DateTime<Utc>>;
}

/// A sink that just accumulates rows in memory, useful for tests and for the FFI layer's
/// in-process round trip before handing the final set back to the host.
#[derive(Default)]
pub struct InMemorySink {
    rows: std::sync::Mutex<Vec<ResultRecord>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_rows(self) -> Vec<ResultRecord> {
        self.rows.into_inner().expect("sink lock poisoned")
    }

    pub fn rows_snapshot(&self) -> Vec<ResultRecord> {
        self.rows.lock().expect("sink lock poisoned").clone()
    }
}

impl ResultSink for InMemorySink {
    fn write_batch(&self, rows: &[ResultRecord]) -> Result<(), String> {
        let mut guard = self.rows.lock().map_err(|e| e.to_string())?;
        guard.extend_from_slice(rows);
        Ok(())
    }

    fn lookup_crawled_at(&self, url: &str) -> Option<DateTime<Utc>> {
        let rows = self.rows.lock().expect("sink lock poisoned");
        rows.iter()
            .rev()
            .find(|r| r.url == url)
            .and_then(|r| DateTime::parse_from_rfc3339(&r.crawled_at).ok())
            .map(|d| d.with_timezone(&Utc))
    }
}
