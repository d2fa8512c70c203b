//! Extraction collaborator boundary (C18).
//!
//! The scheduler depends on a capability trait, not a concrete extractor: full JSON-LD object
//! graphs, microdata, CSS-selector extraction, and JS-variable extraction are external
//! collaborators out of scope for this crate (§1). [`DefaultExtractor`] implements the minimal,
//! in-scope subset this repo needs directly: OpenGraph/meta tags and meta-robots directive
//! detection (`noindex`/`nofollow`), grounded on the OpenGraph/meta handling this repo's teacher
//! shipped in its own extractor module.

use std::collections::HashMap;

use scraper::{Html, Selector};

/// Opaque, extractor-contributed fields attached to a result record (§3, §6).
#[derive(Debug, Clone, Default)]
pub struct ExtractedFields {
    pub jsonld: Option<String>,
    pub opengraph: Option<String>,
    pub meta: Option<String>,
    pub js: Option<String>,
    pub hydration: Option<String>,
    pub readability: Option<String>,
    pub schema_map: Option<String>,
    /// `true` if a `<meta name="robots" content="noindex">` directive was found.
    pub noindex: bool,
    /// `true` if a `<meta name="robots" content="nofollow">` directive was found.
    pub nofollow: bool,
}

/// The capability the fetch pipeline depends on. `Send + Sync` to be shared across workers.
pub trait Extractor: Send + Sync {
    fn extract(&self, html: &str) -> ExtractedFields;
}

/// Minimal default implementation: OpenGraph + meta tags, with meta-robots detection. JSON-LD,
/// microdata, JS variables, hydration state, and readability extraction are left as documented
/// extension points (attach a different `Extractor` impl) rather than reimplemented here.
#[derive(Default)]
pub struct DefaultExtractor;

impl Extractor for DefaultExtractor {
    fn extract(&self, html: &str) -> ExtractedFields {
        let document = Html::parse_document(html);
        let opengraph = extract_opengraph(&document);
        let meta = extract_meta_tags(&document);
        let (noindex, nofollow) = meta_robots_directives(&meta);

        ExtractedFields {
            jsonld: None,
            opengraph: serde_json::to_string(&opengraph).ok(),
            meta: serde_json::to_string(&meta).ok(),
            js: None,
            hydration: None,
            readability: None,
            schema_map: None,
            noindex,
            nofollow,
        }
    }
}

fn extract_opengraph(document: &Html) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Ok(selector) = Selector::parse(r#"meta[property^="og:"]"#) else {
        return out;
    };
    for el in document.select(&selector) {
        if let (Some(property), Some(content)) = (el.value().attr("property"), el.value().attr("content")) {
            out.insert(property.to_string(), content.to_string());
        }
    }
    out
}

fn extract_meta_tags(document: &Html) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Ok(selector) = Selector::parse("meta[name]") else {
        return out;
    };
    for el in document.select(&selector) {
        if let (Some(name), Some(content)) = (el.value().attr("name"), el.value().attr("content")) {
            out.insert(name.to_lowercase(), content.to_string());
        }
    }
    out
}

/// `noindex` clears the body before persistence; `nofollow` suppresses link extraction (§6).
fn meta_robots_directives(meta: &HashMap<String, String>) -> (bool, bool) {
    let Some(robots) = meta.get("robots") else {
        return (false, false);
    };
    let lower = robots.to_lowercase();
    (lower.contains("noindex"), lower.contains("nofollow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_opengraph_tags() {
        let html = r#"<html><head>
            <meta property="og:title" content="Hello">
            <meta property="og:type" content="article">
        </head></html>"#;
        let extractor = DefaultExtractor;
        let fields = extractor.extract(html);
        let og: HashMap<String, String> = serde_json::from_str(&fields.opengraph.unwrap()).unwrap();
        assert_eq!(og.get("og:title").unwrap(), "Hello");
        assert_eq!(og.get("og:type").unwrap(), "article");
    }

    #[test]
    fn detects_noindex_and_nofollow() {
        let html = r#"<html><head>
            <meta name="robots" content="noindex, nofollow">
        </head></html>"#;
        let extractor = DefaultExtractor;
        let fields = extractor.extract(html);
        assert!(fields.noindex);
        assert!(fields.nofollow);
    }

    #[test]
    fn no_robots_meta_means_no_directives() {
        let html = "<html><head></head></html>";
        let extractor = DefaultExtractor;
        let fields = extractor.extract(html);
        assert!(!fields.noindex);
        assert!(!fields.nofollow);
    }

    #[test]
    fn jsonld_and_js_are_left_to_a_richer_extractor() {
        let html = r#"<html><head><script type="application/ld+json">{"@type":"Article"}</script></head></html>"#;
        let extractor = DefaultExtractor;
        let fields = extractor.extract(html);
        assert!(fields.jsonld.is_none());
        assert!(fields.js.is_none());
    }
}
