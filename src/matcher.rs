//! URL pattern matching for site rules and global excludes.
//!
//! Patterns are user-supplied regex sources, either a bare body
//! (`^https?://(twitter|x)\.com`) or a `/body/flags` literal carried over
//! from settings written by older versions. Compilation never panics:
//! invalid syntax yields `None` and the pattern simply never matches.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::SiteRule;

static COMPILE_CACHE: Lazy<Mutex<HashMap<String, Option<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Compile a pattern, memoized by its exact text.
pub fn compile(pattern: &str) -> Option<Regex> {
    {
        let cache = COMPILE_CACHE.lock().unwrap();
        if let Some(cached) = cache.get(pattern) {
            return cached.clone();
        }
    }

    let compiled = build(pattern);
    COMPILE_CACHE
        .lock()
        .unwrap()
        .insert(pattern.to_string(), compiled.clone());
    compiled
}

fn build(pattern: &str) -> Option<Regex> {
    let (body, flags) = match split_literal(pattern) {
        Some(parts) => parts,
        None => (pattern, ""),
    };

    let mut inline = String::new();
    for flag in flags.chars() {
        match flag {
            'i' | 'm' | 's' => inline.push(flag),
            // JS-only flags with no Rust counterpart; matching semantics
            // here are single-URL, so global/sticky/unicode are moot.
            'g' | 'u' | 'y' | 'd' | 'v' => {}
            _ => return None,
        }
    }

    let source = if inline.is_empty() {
        body.to_string()
    } else {
        format!("(?{inline}){body}")
    };
    Regex::new(&source).ok()
}

/// Split a `/body/flags` literal. Anything that does not both start with a
/// slash and contain a closing slash is treated as a bare body.
fn split_literal(pattern: &str) -> Option<(&str, &str)> {
    let rest = pattern.strip_prefix('/')?;
    let close = rest.rfind('/')?;
    if close == 0 {
        return None;
    }
    Some((&rest[..close], &rest[close + 1..]))
}

/// The subset of `patterns` that fail to compile. Settings-form feedback.
pub fn find_invalid(patterns: &[String]) -> Vec<String> {
    patterns
        .iter()
        .filter(|pattern| compile(pattern).is_none())
        .cloned()
        .collect()
}

fn any_match(url: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| compile(pattern).is_some_and(|re| re.is_match(url)))
}

/// First site rule governing `url`, or `None`. Global excludes always win
/// over inclusion so logout/compose/DM-style pages can be carved out of an
/// otherwise site-wide rule.
pub fn match_rule<'a>(
    url: &str,
    site_rules: &'a [SiteRule],
    global_exclude_patterns: &[String],
) -> Option<&'a SiteRule> {
    if any_match(url, global_exclude_patterns) {
        return None;
    }
    site_rules
        .iter()
        .find(|rule| any_match(url, &rule.include_patterns))
}

/// Whether `url` falls under one specific rule, honoring global excludes.
/// Used by the redirect sweeps, which target a single session's site.
pub fn rule_matches(url: &str, rule: &SiteRule, global_exclude_patterns: &[String]) -> bool {
    !any_match(url, global_exclude_patterns) && any_match(url, &rule.include_patterns)
}

pub fn is_governed(url: &str, site_rules: &[SiteRule], global_exclude_patterns: &[String]) -> bool {
    match_rule(url, site_rules, global_exclude_patterns).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, patterns: &[&str]) -> SiteRule {
        SiteRule {
            id: id.to_string(),
            label: id.to_string(),
            include_patterns: patterns.iter().map(|p| p.to_string()).collect(),
            daily_limit_minutes: 30,
            site_url: None,
        }
    }

    #[test]
    fn invalid_patterns_compile_to_none() {
        assert!(compile("([unclosed").is_none());
        assert!(compile(r"^https?://(twitter|x)\.com").is_some());
    }

    #[test]
    fn literal_form_with_flags() {
        let re = compile("/twitter/i").unwrap();
        assert!(re.is_match("https://TWITTER.com"));

        // Unknown flags invalidate the pattern rather than being dropped.
        assert!(compile("/twitter/q").is_none());
    }

    #[test]
    fn bare_leading_slash_is_a_plain_body() {
        let re = compile("/home").unwrap();
        assert!(re.is_match("https://x.com/home"));
    }

    #[test]
    fn find_invalid_filters_to_failures() {
        let patterns = vec![
            r"^https?://x\.com".to_string(),
            "([bad".to_string(),
            "also(bad".to_string(),
        ];
        assert_eq!(find_invalid(&patterns), vec!["([bad", "also(bad"]);
    }

    #[test]
    fn global_exclude_wins_over_matching_include() {
        let rules = vec![rule("x", &[r"^https?://(twitter|x)\.com(/|$)"])];
        let excludes = vec![r"^https?://(twitter|x)\.com/messages".to_string()];

        assert!(match_rule("https://x.com/messages", &rules, &excludes).is_none());
        assert_eq!(
            match_rule("https://x.com/home", &rules, &excludes).map(|r| r.id.as_str()),
            Some("x")
        );
    }

    #[test]
    fn first_rule_in_array_order_wins() {
        let rules = vec![
            rule("broad", &[r"^https?://x\.com"]),
            rule("narrow", &[r"^https?://x\.com/home"]),
        ];
        assert_eq!(
            match_rule("https://x.com/home", &rules, &[]).map(|r| r.id.as_str()),
            Some("broad")
        );
    }

    #[test]
    fn unmatched_url_is_ungoverned() {
        let rules = vec![rule("x", &[r"^https?://x\.com"])];
        assert!(!is_governed("https://example.com", &rules, &[]));
        assert!(is_governed("https://x.com/home", &rules, &[]));
    }

    #[test]
    fn rule_matches_honors_excludes() {
        let target = rule("x", &[r"^https?://x\.com"]);
        let excludes = vec![r"^https?://x\.com/compose".to_string()];
        assert!(rule_matches("https://x.com/home", &target, &excludes));
        assert!(!rule_matches("https://x.com/compose/tweet", &target, &excludes));
        assert!(!rule_matches("https://example.com", &target, &excludes));
    }
}
