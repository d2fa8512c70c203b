//! HTTP transport collaborator (§6): a blocking `fetch` contract the scheduler calls into.
//!
//! The scheduler is a synchronous OS-thread worker pool (§5), so the bundled default
//! implementation wraps `reqwest::blocking::Client` rather than an async runtime. A host may
//! substitute any other `HttpTransport` impl (e.g. one that proxies back through its own
//! connection pool) without touching the scheduler.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Response (or transport failure) from one fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status, or `<= 0` for a transport-level failure.
    pub status: i32,
    pub body: Vec<u8>,
    pub content_type: String,
    pub headers: HashMap<String, String>,
    pub final_url: String,
    pub redirect_count: u32,
    pub elapsed_ms: i64,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub server_date: Option<String>,
    pub error: Option<String>,
}

impl FetchResponse {
    pub fn transport_error(message: impl Into<String>, elapsed_ms: i64) -> Self {
        Self {
            status: 0,
            body: Vec::new(),
            content_type: String::new(),
            headers: HashMap::new(),
            final_url: String::new(),
            redirect_count: 0,
            elapsed_ms,
            etag: None,
            last_modified: None,
            server_date: None,
            error: Some(message.into()),
        }
    }
}

/// The HTTP transport contract. `Send + Sync` because it's shared across worker threads.
pub trait HttpTransport: Send + Sync {
    fn fetch(
        &self,
        url: &str,
        user_agent: &str,
        headers: &HashMap<String, String>,
        timeout_ms: u64,
        max_bytes: u64,
    ) -> FetchResponse;
}

/// Default transport: a blocking `reqwest` client with redirect following, standard-encoding
/// decompression, and byte-capped streaming reads. Builds one client per `fetch` call so each
/// call gets its own redirect-count tracker; `reqwest::blocking::Client` is cheap to construct
/// (it does not itself own a connection pool worth amortizing across unrelated hosts here).
pub struct ReqwestTransport {
    max_redirects: usize,
}

impl ReqwestTransport {
    pub fn new(max_redirects: usize) -> Self {
        Self { max_redirects }
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(10)
    }
}

impl HttpTransport for ReqwestTransport {
    fn fetch(
        &self,
        url: &str,
        user_agent: &str,
        headers: &HashMap<String, String>,
        timeout_ms: u64,
        max_bytes: u64,
    ) -> FetchResponse {
        let start = Instant::now();
        let redirects_seen = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let redirects_for_policy = redirects_seen.clone();
        let max_redirects = self.max_redirects;

        let client = match reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::custom(move |attempt| {
                let count = redirects_for_policy.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                if count as usize > max_redirects {
                    attempt.error("too many redirects")
                } else {
                    attempt.follow()
                }
            }))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis() as i64;
                return FetchResponse::transport_error(e.to_string(), elapsed_ms);
            }
        };

        let mut builder = client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(Duration::from_millis(timeout_ms));
        for (k, v) in headers {
            builder = builder.header(k.as_str(), v.as_str());
        }

        let response = match builder.send() {
            Ok(r) => r,
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis() as i64;
                return FetchResponse::transport_error(classify_reqwest_error(&e), elapsed_ms);
            }
        };

        let status = response.status().as_u16() as i32;
        let final_url = response.url().to_string();
        let redirect_count = redirects_seen.load(std::sync::atomic::Ordering::SeqCst);
        let header_map = response.headers().clone();
        let content_type = header_map
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let etag = header_map
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let last_modified = header_map
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let server_date = header_map
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut headers_out = HashMap::new();
        for (name, value) in header_map.iter() {
            if let Ok(v) = value.to_str() {
                headers_out.insert(name.to_string(), v.to_string());
            }
        }

        let body = match read_capped(response, max_bytes) {
            Ok(b) => b,
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis() as i64;
                return FetchResponse::transport_error(e, elapsed_ms);
            }
        };

        FetchResponse {
            status,
            body,
            content_type,
            headers: headers_out,
            final_url,
            redirect_count,
            elapsed_ms: start.elapsed().as_millis() as i64,
            etag,
            last_modified,
            server_date,
            error: None,
        }
    }
}

fn read_capped(mut response: reqwest::blocking::Response, max_bytes: u64) -> Result<Vec<u8>, String> {
    use std::io::Read;
    let mut buf = Vec::new();
    let mut limited = (&mut response).take(max_bytes + 1);
    limited
        .read_to_end(&mut buf)
        .map_err(|e| format!("body read error: {e}"))?;
    buf.truncate(max_bytes as usize);
    Ok(buf)
}

fn classify_reqwest_error(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "timeout".to_string()
    } else if err.is_connect() {
        "connection error".to_string()
    } else {
        err.to_string()
    }
}

/// Parse an HTTP `Date`/`Last-Modified` style header into a `DateTime<Utc>`.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
