//! Robots.txt parsing and per-user-agent rule selection (C1).
//!
//! Matching semantics are implemented directly rather than delegated to a third-party robots.txt
//! crate: the longest-match allow/disallow rule, `Request-rate` conversion, and crawl-delay
//! clamping below are part of this system's contract (see SPEC_FULL.md §4.1 and the Open Question
//! decision in DESIGN.md — longest match wins, not first match).

use std::collections::HashMap;

/// One user-agent block's rules.
#[derive(Debug, Clone, Default)]
pub struct AgentRules {
    pub allow: Vec<String>,
    pub disallow: Vec<String>,
    pub crawl_delay: Option<f64>,
    /// Seconds per request, derived from `Request-rate: n/m` as `m/n`.
    pub request_rate_delay: Option<f64>,
}

/// A fully parsed robots.txt document.
#[derive(Debug, Clone, Default)]
pub struct Robots {
    agents: HashMap<String, AgentRules>,
    pub sitemaps: Vec<String>,
}

impl Robots {
    /// Robots.txt that permits everything (used when a domain has none, or it failed to fetch).
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Self {
        let mut agents: HashMap<String, AgentRules> = HashMap::new();
        let mut sitemaps = Vec::new();
        let mut current_agents: Vec<String> = Vec::new();
        let mut seen_rule_since_ua = false;

        for raw_line in text.lines() {
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if seen_rule_since_ua {
                        current_agents.clear();
                        seen_rule_since_ua = false;
                    }
                    current_agents.push(value.to_lowercase());
                }
                "sitemap" => {
                    if !value.is_empty() {
                        sitemaps.push(value.to_string());
                    }
                }
                "allow" | "disallow" => {
                    seen_rule_since_ua = true;
                    if current_agents.is_empty() {
                        continue;
                    }
                    for ua in &current_agents {
                        let rules = agents.entry(ua.clone()).or_default();
                        if !value.is_empty() {
                            if key == "allow" {
                                rules.allow.push(value.to_string());
                            } else {
                                rules.disallow.push(value.to_string());
                            }
                        }
                        // `Disallow:` with an empty value means "allow everything" — nothing to record.
                    }
                }
                "crawl-delay" => {
                    seen_rule_since_ua = true;
                    if let Ok(delay) = value.parse::<f64>() {
                        if delay >= 0.0 {
                            for ua in &current_agents {
                                agents.entry(ua.clone()).or_default().crawl_delay = Some(delay);
                            }
                        }
                    }
                }
                "request-rate" => {
                    seen_rule_since_ua = true;
                    if let Some(delay) = parse_request_rate(value) {
                        for ua in &current_agents {
                            agents.entry(ua.clone()).or_default().request_rate_delay = Some(delay);
                        }
                    }
                }
                _ => {}
            }
        }

        Self { agents, sitemaps }
    }

    /// Select rules for `user_agent`: exact match, then longest prefix match, then `*`, else
    /// `None` (treated as allow-all by callers).
    fn select(&self, user_agent: &str) -> Option<&AgentRules> {
        let ua_lower = user_agent.to_lowercase();
        if let Some(r) = self.agents.get(&ua_lower) {
            return Some(r);
        }
        let mut best: Option<(&str, &AgentRules)> = None;
        for (key, rules) in &self.agents {
            if key == "*" {
                continue;
            }
            if ua_lower.starts_with(key.as_str())
                && best.map_or(true, |(b, _)| key.len() > b.len())
            {
                best = Some((key, rules));
            }
        }
        if let Some((_, rules)) = best {
            return Some(rules);
        }
        self.agents.get("*")
    }

    /// True if `path` (path+query, no scheme/host) is allowed for `user_agent`.
    pub fn is_allowed(&self, path: &str, user_agent: &str) -> bool {
        let Some(rules) = self.select(user_agent) else {
            return true;
        };
        let allow_match = longest_match(&rules.allow, path);
        let disallow_match = longest_match(&rules.disallow, path);
        match (allow_match, disallow_match) {
            (Some(a), Some(d)) => a >= d,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => true,
        }
    }

    /// Effective crawl delay for `user_agent`, clamped into `[min_delay, max_delay]`, filled with
    /// `default_delay` when robots.txt specified nothing. Returns `(delay, has_explicit_delay)`.
    pub fn effective_delay(
        &self,
        user_agent: &str,
        default_delay: f64,
        min_delay: f64,
        max_delay: f64,
    ) -> (f64, bool) {
        let rules = self.select(user_agent);
        let explicit = rules.and_then(|r| match (r.crawl_delay, r.request_rate_delay) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        });
        match explicit {
            Some(d) => (d.clamp(min_delay, max_delay), true),
            None => (default_delay.clamp(min_delay, max_delay), false),
        }
    }
}

/// Longest matching rule prefix length, `None` if nothing matches.
fn longest_match(patterns: &[String], path: &str) -> Option<usize> {
    patterns.iter().filter_map(|p| match_len(p, path)).max()
}

fn match_len(pattern: &str, path: &str) -> Option<usize> {
    if let Some(stripped) = pattern.strip_suffix('$') {
        return (path == stripped).then_some(pattern.len());
    }
    if pattern.contains('*') {
        return wildcard_match(pattern, path).then_some(pattern.len());
    }
    path.starts_with(pattern).then_some(pattern.len())
}

/// Minimal `*`-wildcard prefix matcher (trailing `$` is handled by the caller).
fn wildcard_match(pattern: &str, path: &str) -> bool {
    let mut segments = pattern.split('*');
    let first = segments.next().unwrap_or("");
    if !path.starts_with(first) {
        return false;
    }
    let mut pos = first.len();
    for seg in segments {
        if seg.is_empty() {
            continue;
        }
        match path[pos..].find(seg) {
            Some(found) => pos += found + seg.len(),
            None => return false,
        }
    }
    true
}

fn parse_request_rate(value: &str) -> Option<f64> {
    let (n, m) = value.split_once('/')?;
    let n: f64 = n.trim().parse().ok()?;
    let m: f64 = m.trim().parse().ok()?;
    if n <= 0.0 {
        return None;
    }
    Some(m / n)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}
