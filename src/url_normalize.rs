//! URL normalization and SURT keys (C13).

use url::Url;

const TRACKING_PREFIXES: &[&str] = &["utm_"];
const TRACKING_EXACT: &[&str] = &["fbclid", "gclid"];

/// Lowercase scheme/host, strip default ports, collapse duplicate path slashes, sort query
/// parameters, and strip tracking parameters. Returns `None` if `raw` does not parse as a URL.
pub fn normalize(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;

    let scheme = url.scheme().to_lowercase();
    url.set_scheme(&scheme).ok()?;

    if let Some(host) = url.host_str() {
        let host = host.to_lowercase();
        url.set_host(Some(&host)).ok()?;
    }

    let is_default_port = matches!(
        (url.scheme(), url.port()),
        ("http", Some(80)) | ("https", Some(443))
    );
    if is_default_port {
        url.set_port(None).ok()?;
    }

    let collapsed = collapse_slashes(url.path());
    url.set_path(&collapsed);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        url.set_query(Some(&serializer.finish()));
    }

    Some(url.to_string())
}

fn is_tracking_param(key: &str) -> bool {
    let lower = key.to_lowercase();
    TRACKING_PREFIXES.iter().any(|p| lower.starts_with(p))
        || TRACKING_EXACT.iter().any(|e| lower == *e)
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    if out.is_empty() {
        "/".to_string()
    } else {
        out
    }
}

/// Sort-friendly URL Reordering Transform: `com,example,www)/path?query`.
pub fn surt(normalized_url: &str) -> Option<String> {
    let url = Url::parse(normalized_url).ok()?;
    let host = url.host_str()?;
    let mut labels: Vec<&str> = host.split('.').collect();
    labels.reverse();
    let reversed_host = labels.join(",");

    let mut key = format!("{})", reversed_host);
    key.push_str(url.path());
    if let Some(q) = url.query() {
        key.push('?');
        key.push_str(q);
    }
    Some(key)
}

/// Match `value` against a SQL `LIKE`-style pattern using `%` as the only wildcard (an empty
/// pattern matches everything, i.e. "no filter").
pub fn matches_like_pattern(value: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return value == pattern;
    }

    let first = segments[0];
    let last = segments[segments.len() - 1];
    if !value.starts_with(first) || !value.ends_with(last) {
        return false;
    }
    let mut pos = first.len();
    let end = value.len() - last.len();
    if pos > end {
        return false;
    }
    for seg in &segments[1..segments.len() - 1] {
        if seg.is_empty() {
            continue;
        }
        match value[pos..end].find(seg) {
            Some(found) => pos += found + seg.len(),
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_scheme_and_host() {
        let n = normalize("HTTP://Example.COM/Path").unwrap();
        assert!(n.starts_with("http://example.com"));
    }

    #[test]
    fn strips_default_ports() {
        assert_eq!(
            normalize("http://example.com:80/x").unwrap(),
            "http://example.com/x"
        );
        assert_eq!(
            normalize("https://example.com:443/x").unwrap(),
            "https://example.com/x"
        );
        // non-default port is kept
        assert!(normalize("http://example.com:8080/x")
            .unwrap()
            .contains(":8080"));
    }

    #[test]
    fn collapses_duplicate_slashes() {
        let n = normalize("http://example.com//a///b").unwrap();
        assert_eq!(n, "http://example.com/a/b");
    }

    #[test]
    fn sorts_query_params_and_strips_tracking() {
        let n = normalize("http://example.com/?b=2&a=1&utm_source=x&fbclid=y").unwrap();
        assert_eq!(n, "http://example.com/?a=1&b=2");
    }

    #[test]
    fn normalizing_twice_is_a_fixed_point() {
        let once = normalize("HTTP://Example.com:80//a//b?z=1&utm_campaign=foo&a=2").unwrap();
        let twice = normalize(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn surt_reverses_hostname() {
        let n = normalize("http://www.example.com/path?q=1").unwrap();
        let s = surt(&n).unwrap();
        assert_eq!(s, "com,example,www)/path?q=1");
    }

    #[test]
    fn invalid_url_returns_none() {
        assert!(normalize("not a url").is_none());
    }

    #[test]
    fn empty_pattern_matches_everything() {
        assert!(matches_like_pattern("https://example.com/x", ""));
    }

    #[test]
    fn percent_wildcard_matches_substring_anywhere() {
        assert!(matches_like_pattern(
            "https://example.com/product/123",
            "%/product/%"
        ));
        assert!(!matches_like_pattern("https://example.com/about", "%/product/%"));
    }

    #[test]
    fn pattern_without_wildcard_requires_exact_match() {
        assert!(matches_like_pattern("abc", "abc"));
        assert!(!matches_like_pattern("xabc", "abc"));
    }

    #[test]
    fn prefix_and_suffix_wildcards_anchor_correctly() {
        assert!(matches_like_pattern("https://example.com/x", "https://%"));
        assert!(matches_like_pattern("https://example.com/x", "%/x"));
        assert!(!matches_like_pattern("https://example.com/x", "%/y"));
    }
}
