//! Sitemap and sitemap-index XML parsing (C2).
//!
//! Gzip-compressed sitemaps are auto-detected by magic bytes (`1f 8b`) and decompressed before
//! parsing. Malformed XML never aborts the crawl: `quick_xml` parse errors are recorded in
//! `SitemapResult::errors` and parsing stops at the point of failure, returning whatever entries
//! were recovered up to there.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::Read;

/// Single `<url>` entry from a urlset sitemap.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub url: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
}

/// Single `<sitemap>` entry from a sitemap-index.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapIndexEntry {
    pub url: String,
    pub lastmod: Option<String>,
}

/// Result of parsing one sitemap document.
#[derive(Debug, Clone, Default)]
pub struct SitemapResult {
    /// URL entries, present when the root was `<urlset>`.
    pub urls: Vec<SitemapEntry>,
    /// Child sitemap references, present when the root was `<sitemapindex>`.
    pub sitemaps: Vec<SitemapIndexEntry>,
    /// Non-fatal parse errors encountered along the way.
    pub errors: Vec<String>,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decompress `bytes` if gzip-magic-prefixed, then decode as UTF-8 (lossily, since sitemaps in
/// the wild are not always strictly valid UTF-8).
pub fn decode_body(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0..2] == GZIP_MAGIC {
        let mut decoder = flate2::read::GzDecoder::new(bytes);
        let mut out = String::new();
        if decoder.read_to_string(&mut out).is_ok() {
            return out;
        }
        // Fall through to lossy decode of the raw (still-compressed) bytes rather than erroring.
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Parse sitemap XML content (already decompressed / decoded).
pub fn parse_sitemap(xml: &str) -> SitemapResult {
    let mut result = SitemapResult::default();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut current_tag = String::new();
    let mut in_url = false;
    let mut in_sitemap = false;

    let mut url = String::new();
    let mut lastmod: Option<String> = None;
    let mut changefreq: Option<String> = None;
    let mut priority: Option<f64> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                current_tag = tag.clone();

                match tag.as_str() {
                    "url" => {
                        in_url = true;
                        url.clear();
                        lastmod = None;
                        changefreq = None;
                        priority = None;
                    }
                    "sitemap" => {
                        in_sitemap = true;
                        url.clear();
                        lastmod = None;
                    }
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.local_name().as_ref()).to_string();

                match tag.as_str() {
                    "url" if in_url => {
                        if !url.is_empty() {
                            result.urls.push(SitemapEntry {
                                url: url.trim().to_string(),
                                lastmod: lastmod.clone(),
                                changefreq: changefreq.clone(),
                                priority,
                            });
                        }
                        in_url = false;
                    }
                    "sitemap" if in_sitemap => {
                        if !url.is_empty() {
                            result.sitemaps.push(SitemapIndexEntry {
                                url: url.trim().to_string(),
                                lastmod: lastmod.clone(),
                            });
                        }
                        in_sitemap = false;
                    }
                    _ => {}
                }
                current_tag.clear();
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().unwrap_or_default().trim().to_string();

                if in_url || in_sitemap {
                    match current_tag.as_str() {
                        "loc" => url = text,
                        "lastmod" => lastmod = Some(text),
                        "changefreq" if in_url => changefreq = Some(text),
                        "priority" if in_url => priority = text.parse().ok(),
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                result.errors.push(format!("XML parse error: {e}"));
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    result
}
