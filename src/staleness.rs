//! Staleness evaluation (C6): decide whether a sitemap-discovered URL needs a fresh fetch.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    New,
    Stale,
    Fresh,
}

/// Parse a sitemap `<lastmod>` value, which may be a full RFC3339 timestamp or a bare
/// `YYYY-MM-DD` date (both are valid per the sitemap protocol).
pub fn parse_lastmod(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

/// Convert a sitemap `changefreq` value into the staleness window, in hours.
pub fn changefreq_hours(changefreq: Option<&str>) -> i64 {
    match changefreq.map(|s| s.to_lowercase()) {
        Some(ref s) if s == "always" => 0,
        Some(ref s) if s == "hourly" => 1,
        Some(ref s) if s == "daily" => 24,
        Some(ref s) if s == "weekly" => 168,
        Some(ref s) if s == "monthly" => 720,
        Some(ref s) if s == "yearly" => 8760,
        Some(ref s) if s == "never" => 87600,
        _ => 168,
    }
}

/// Evaluate staleness per §4.6. `existing_crawled_at` is `None` when there is no existing row.
pub fn evaluate(
    existing_crawled_at: Option<DateTime<Utc>>,
    sitemap_lastmod: Option<DateTime<Utc>>,
    changefreq: Option<&str>,
    now: DateTime<Utc>,
) -> Staleness {
    let Some(crawled_at) = existing_crawled_at else {
        return Staleness::New;
    };

    if let Some(lastmod) = sitemap_lastmod {
        if lastmod > crawled_at {
            return Staleness::Stale;
        }
    }

    let window_hours = changefreq_hours(changefreq);
    let age_hours = (now - crawled_at).num_seconds() as f64 / 3600.0;
    if age_hours > window_hours as f64 {
        Staleness::Stale
    } else {
        Staleness::Fresh
    }
}
