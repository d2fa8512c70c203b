//! Crate-level error taxonomy.
//!
//! `CrawlError` covers failures that can abort an entire `CRAWL` call (bad config, a dead host
//! store, a poisoned lock). It is distinct from the per-row `error_type` classification in
//! [`crate::backoff::ErrorClass`], which never aborts a crawl — only individual rows.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid crawl configuration: {0}")]
    Config(String),

    #[error("invalid request JSON: {0}")]
    RequestJson(#[from] serde_json::Error),

    #[error("host result sink rejected a batch: {0}")]
    SinkRejected(String),

    #[error("internal lock poisoned: {0}")]
    Poisoned(String),

    #[error("crawl interrupted")]
    Interrupted,
}

pub type CrawlResult<T> = Result<T, CrawlError>;
