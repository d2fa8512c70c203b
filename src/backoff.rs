//! Retry/backoff engine (C8): outcome classification and Fibonacci backoff scheduling.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// The error taxonomy assigned to a result record's `error_type` column (§7). Distinct from
/// [`crate::error::CrawlError`], which is for crate-level failures, not per-row outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    None,
    NetworkTimeout,
    NetworkDns,
    NetworkConnection,
    NetworkTls,
    HttpClient4xx,
    HttpServer5xx,
    HttpRateLimited,
    RobotsDisallowed,
    ContentTooLarge,
    ContentTypeRejected,
    RedirectLoop,
    ParseError,
    Interrupted,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::None => "NONE",
            ErrorClass::NetworkTimeout => "NETWORK_TIMEOUT",
            ErrorClass::NetworkDns => "NETWORK_DNS",
            ErrorClass::NetworkConnection => "NETWORK_CONNECTION",
            ErrorClass::NetworkTls => "NETWORK_TLS",
            ErrorClass::HttpClient4xx => "HTTP_CLIENT_4XX",
            ErrorClass::HttpServer5xx => "HTTP_SERVER_5XX",
            ErrorClass::HttpRateLimited => "HTTP_RATE_LIMITED",
            ErrorClass::RobotsDisallowed => "ROBOTS_DISALLOWED",
            ErrorClass::ContentTooLarge => "CONTENT_TOO_LARGE",
            ErrorClass::ContentTypeRejected => "CONTENT_TYPE_REJECTED",
            ErrorClass::RedirectLoop => "REDIRECT_LOOP",
            ErrorClass::ParseError => "PARSE_ERROR",
            ErrorClass::Interrupted => "INTERRUPTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Retryable(ErrorClass),
    Permanent(ErrorClass),
}

/// Classify an HTTP status (`status <= 0` means a transport-level failure) per §4.8.
pub fn classify_status(status: i32) -> Outcome {
    if status <= 0 {
        return Outcome::Retryable(ErrorClass::NetworkConnection);
    }
    match status {
        408 | 425 => Outcome::Retryable(ErrorClass::NetworkTimeout),
        429 => Outcome::Retryable(ErrorClass::HttpRateLimited),
        500..=504 => Outcome::Retryable(ErrorClass::HttpServer5xx),
        200..=399 => Outcome::Success,
        304 => Outcome::Success,
        400..=499 => Outcome::Permanent(ErrorClass::HttpClient4xx),
        _ => Outcome::Permanent(ErrorClass::HttpClient4xx),
    }
}

const MAX_RETRIES: u32 = 5;

/// `a=3, b=3` Fibonacci-like backoff in seconds, capped at `max_seconds`.
pub fn fib_backoff(consecutive_errors: u32, max_seconds: u64) -> Duration {
    let mut a: u64 = 3;
    let mut b: u64 = 3;
    if consecutive_errors <= 1 {
        return Duration::from_secs(a.min(max_seconds));
    }
    for _ in 1..consecutive_errors {
        let next = a + b;
        a = b;
        b = next;
        if b >= max_seconds {
            return Duration::from_secs(max_seconds);
        }
    }
    Duration::from_secs(b.min(max_seconds))
}

pub fn should_drop_after_retries(retry_count: u32) -> bool {
    retry_count >= MAX_RETRIES
}

/// Parse a `Retry-After` header value: either seconds, or an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let parsed = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let delta = parsed.with_timezone(&Utc) - now;
    let secs = delta.num_seconds();
    Some(Duration::from_secs(secs.max(0) as u64))
}
