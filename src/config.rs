//! Host-supplied crawl configuration (C14).
//!
//! The `CRAWL ... INTO` SQL extension marshals its `WITH` clause into a JSON object before
//! calling across the FFI boundary. [`CrawlConfig::from_json`] is the single place that JSON is
//! turned into validated, typed settings; every other component reads `CrawlConfig` fields, never
//! raw JSON.

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

fn default_threads() -> usize {
    4
}
fn default_max_total_connections() -> usize {
    16
}
fn default_max_parallel_per_domain() -> usize {
    4
}
fn default_timeout_seconds() -> u64 {
    30
}
fn default_crawl_delay() -> f64 {
    1.0
}
fn default_min_crawl_delay() -> f64 {
    0.0
}
fn default_max_crawl_delay() -> f64 {
    60.0
}
fn default_max_retry_backoff_seconds() -> u64 {
    600
}
fn default_true() -> bool {
    true
}
fn default_max_crawl_depth() -> u32 {
    10
}
fn default_max_crawl_pages() -> u64 {
    1000
}
fn default_max_response_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_sitemap_cache_hours() -> i64 {
    24
}
fn default_batch_size() -> usize {
    100
}

/// Validated, immutable settings a single `CRAWL` call runs under. Shared across worker threads
/// behind an `Arc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    pub user_agent: String,

    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_max_total_connections")]
    pub max_total_connections: usize,
    #[serde(default = "default_max_parallel_per_domain")]
    pub max_parallel_per_domain: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_crawl_delay")]
    pub default_crawl_delay: f64,
    #[serde(default = "default_min_crawl_delay")]
    pub min_crawl_delay: f64,
    #[serde(default = "default_max_crawl_delay")]
    pub max_crawl_delay: f64,
    #[serde(default = "default_max_retry_backoff_seconds")]
    pub max_retry_backoff_seconds: u64,

    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,
    #[serde(default = "default_true")]
    pub respect_nofollow: bool,
    #[serde(default = "default_true")]
    pub follow_links: bool,
    #[serde(default)]
    pub follow_canonical: bool,
    #[serde(default)]
    pub allow_subdomains: bool,

    #[serde(default = "default_max_crawl_depth")]
    pub max_crawl_depth: u32,
    #[serde(default = "default_max_crawl_pages")]
    pub max_crawl_pages: u64,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: u64,

    #[serde(default)]
    pub accept_content_types: String,
    #[serde(default)]
    pub reject_content_types: String,

    #[serde(default = "default_true")]
    pub compress: bool,

    #[serde(default = "default_sitemap_cache_hours")]
    pub sitemap_cache_hours: i64,
    #[serde(default)]
    pub update_stale: bool,

    #[serde(default)]
    pub url_filter: String,
    #[serde(default = "default_true")]
    pub log_skipped: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl CrawlConfig {
    /// Parse and validate a host-supplied JSON config object.
    ///
    /// Returns `CrawlError::Config` before any worker thread is spawned if validation fails, so
    /// no partial crawl state is ever created for a rejected config.
    pub fn from_json(json: &str) -> Result<Self, CrawlError> {
        let mut cfg: CrawlConfig =
            serde_json::from_str(json).map_err(|e| CrawlError::Config(e.to_string()))?;
        cfg.validate_and_clamp()?;
        Ok(cfg)
    }

    fn validate_and_clamp(&mut self) -> Result<(), CrawlError> {
        if self.user_agent.trim().is_empty() {
            return Err(CrawlError::Config("user_agent must not be empty".into()));
        }
        self.threads = self.threads.clamp(1, 32);
        if self.max_total_connections == 0 {
            return Err(CrawlError::Config(
                "max_total_connections must be at least 1".into(),
            ));
        }
        if self.max_parallel_per_domain == 0 {
            return Err(CrawlError::Config(
                "max_parallel_per_domain must be at least 1".into(),
            ));
        }
        if self.min_crawl_delay < 0.0 {
            return Err(CrawlError::Config("min_crawl_delay must be >= 0".into()));
        }
        if self.min_crawl_delay > self.max_crawl_delay {
            return Err(CrawlError::Config(
                "min_crawl_delay must be <= max_crawl_delay".into(),
            ));
        }
        self.default_crawl_delay = self
            .default_crawl_delay
            .clamp(self.min_crawl_delay, self.max_crawl_delay);
        if self.max_crawl_pages == 0 {
            return Err(CrawlError::Config("max_crawl_pages must be > 0".into()));
        }
        if self.batch_size == 0 {
            return Err(CrawlError::Config("batch_size must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_when_only_user_agent_given() {
        let cfg = CrawlConfig::from_json(r#"{"user_agent": "TestBot/1.0"}"#).unwrap();
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.max_total_connections, 16);
        assert_eq!(cfg.max_parallel_per_domain, 4);
        assert_eq!(cfg.timeout_seconds, 30);
        assert!(cfg.respect_robots_txt);
        assert_eq!(cfg.batch_size, 100);
    }

    #[test]
    fn empty_user_agent_is_rejected() {
        let err = CrawlConfig::from_json(r#"{"user_agent": ""}"#).unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn threads_are_clamped_to_32() {
        let cfg = CrawlConfig::from_json(r#"{"user_agent": "a", "threads": 999}"#).unwrap();
        assert_eq!(cfg.threads, 32);
    }

    #[test]
    fn threads_clamp_up_from_zero() {
        let cfg = CrawlConfig::from_json(r#"{"user_agent": "a", "threads": 0}"#).unwrap();
        assert_eq!(cfg.threads, 1);
    }

    #[test]
    fn inverted_delay_bounds_are_rejected() {
        let err = CrawlConfig::from_json(
            r#"{"user_agent": "a", "min_crawl_delay": 10.0, "max_crawl_delay": 1.0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }

    #[test]
    fn default_delay_is_clamped_into_bounds() {
        let cfg = CrawlConfig::from_json(
            r#"{"user_agent": "a", "default_crawl_delay": 100.0, "max_crawl_delay": 5.0}"#,
        )
        .unwrap();
        assert_eq!(cfg.default_crawl_delay, 5.0);
    }

    #[test]
    fn malformed_json_is_rejected() {
        let err = CrawlConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));
    }
}
