//! Route scope decisions: which requests are captured, which routes are
//! blocked outright.
//!
//! The block list wins over everything else and is consulted for every
//! candidate route, including ones outside any captured namespace (the same
//! patterns also filter the route index).

use crate::settings::AuditSettings;
use regex::RegexBuilder;
use std::sync::RwLock;

/// Check a route against a single block pattern.
///
/// Supported forms, in evaluation order:
/// - case-insensitive exact match;
/// - `prefix/*`: matches anything under the prefix, and the bare prefix
///   itself with the trailing slash stripped;
/// - any other pattern containing `*`: literal-escaped, `*` becomes `.*`,
///   anchored, case-insensitive;
/// - a pattern without `*`: treated as a raw anchored case-insensitive
///   regular expression, so operators can use capture groups and classes.
///
/// A malformed regular expression is a non-match, never an error.
pub fn matches_pattern(route: &str, pattern: &str) -> bool {
    let pattern = pattern.trim();

    if pattern.is_empty() {
        return false;
    }

    if route.eq_ignore_ascii_case(pattern) {
        return true;
    }

    if pattern.len() >= 2 && pattern.ends_with("/*") {
        let stem = pattern[..pattern.len() - 1].trim_end_matches('/');
        let prefix = format!("{}/", stem);

        let prefix_match = route
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(&prefix))
            .unwrap_or(false);

        if prefix_match || route.trim_end_matches('/').eq_ignore_ascii_case(stem) {
            return true;
        }
    }

    let source = if pattern.contains('*') {
        format!("^{}$", regex::escape(pattern).replace("\\*", ".*"))
    } else {
        format!("^{}$", pattern)
    };

    match RegexBuilder::new(&source).case_insensitive(true).build() {
        Ok(re) => re.is_match(route),
        Err(_) => false,
    }
}

/// True if `route` matches any pattern in the list.
pub fn route_blocked(route: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| matches_pattern(route, p))
}

/// Decide whether a route is captured under the given settings.
///
/// Block list first, then `capture_all`, then the namespace prefixes:
/// `/wc/` always, plus the configured extra namespaces when extended capture
/// is on.
pub fn is_in_scope(route: &str, settings: &AuditSettings) -> bool {
    if route_blocked(route, &settings.blocked_patterns()) {
        return false;
    }

    if settings.capture_all {
        return true;
    }

    let mut namespaces = vec!["/wc/".to_string()];

    if settings.capture_extended {
        for namespace in &settings.extra_namespaces {
            let normalized = format!("/{}", namespace.trim_start_matches('/'));
            if normalized == "/" {
                continue;
            }
            namespaces.push(format!("{}/", normalized.trim_end_matches('/')));
        }
    }

    let route = with_trailing_slash(route);
    namespaces.iter().any(|ns| route.starts_with(ns.as_str()))
}

/// Ensure a route ends with a single trailing slash.
pub fn with_trailing_slash(route: &str) -> String {
    format!("{}/", route.trim_end_matches('/'))
}

/// Filters route listings against the block list and remembers what was
/// removed.
#[derive(Default)]
pub struct RouteScope {
    last_blocked: RwLock<Vec<String>>,
}

impl RouteScope {
    /// Create a new route-scope service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove blocked routes from an index listing, recording the removals.
    ///
    /// Every route in the listing is tested, whether or not it falls inside a
    /// captured namespace.
    pub fn filter_route_index(
        &self,
        routes: Vec<String>,
        settings: &AuditSettings,
    ) -> Vec<String> {
        let patterns = settings.blocked_patterns();

        if patterns.is_empty() {
            if let Ok(mut last) = self.last_blocked.write() {
                last.clear();
            }
            return routes;
        }

        let mut kept = Vec::with_capacity(routes.len());
        let mut blocked = Vec::new();

        for route in routes {
            if route_blocked(&route, &patterns) {
                blocked.push(route);
            } else {
                kept.push(route);
            }
        }

        if let Ok(mut last) = self.last_blocked.write() {
            *last = blocked;
        }

        kept
    }

    /// Routes removed by the most recent [`filter_route_index`] call.
    ///
    /// [`filter_route_index`]: RouteScope::filter_route_index
    pub fn last_blocked_routes(&self) -> Vec<String> {
        self.last_blocked
            .read()
            .map(|routes| routes.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn trailing_wildcard_matches_nested_route() {
        assert!(matches_pattern("/wp/v2/users/123", "/wp/v2/users/*"));
    }

    #[test]
    fn trailing_wildcard_matches_bare_prefix() {
        assert!(matches_pattern("/wp/v2/users", "/wp/v2/users/*"));
    }

    #[test]
    fn inner_wildcard_becomes_regex() {
        assert!(matches_pattern("/wc/v1/items", "/wc/*/items"));
        assert!(!matches_pattern("/wc/v1/items/extra", "/wc/*/items"));
    }

    #[test]
    fn non_matching_pattern_does_not_block() {
        assert!(!matches_pattern("/wc/v2/items", "/wc/v1/items"));
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        assert!(matches_pattern("/WC/V3/Orders", "/wc/v3/orders"));
    }

    #[test]
    fn plain_pattern_is_treated_as_regex() {
        assert!(matches_pattern("/wc/v3/orders/42", "/wc/v3/orders/[0-9]+"));
        assert!(!matches_pattern("/wc/v3/orders/abc", "/wc/v3/orders/[0-9]+"));
    }

    #[test]
    fn malformed_regex_is_a_non_match() {
        assert!(!matches_pattern("/wc/v3/orders", "/wc/(unclosed"));
    }

    #[test]
    fn route_blocked_checks_every_pattern() {
        let list = patterns(&["/wp/v2/users/*", "/wc/v3/system_status"]);
        assert!(route_blocked("/wc/v3/system_status", &list));
        assert!(route_blocked("/wp/v2/users/7", &list));
        assert!(!route_blocked("/wc/v3/orders", &list));
    }

    #[test]
    fn default_scope_covers_wc_namespace_only() {
        let settings = AuditSettings::default();

        assert!(is_in_scope("/wc/v3/orders", &settings));
        assert!(!is_in_scope("/wp/v2/posts", &settings));
    }

    #[test]
    fn capture_all_admits_everything_not_blocked() {
        let settings = AuditSettings {
            capture_all: true,
            blocked_endpoints: vec!["/wp/v2/users/*".to_string()],
            ..AuditSettings::default()
        };

        assert!(is_in_scope("/wp/v2/posts", &settings));
        assert!(!is_in_scope("/wp/v2/users/1", &settings));
    }

    #[test]
    fn block_list_wins_over_namespace() {
        let settings = AuditSettings {
            blocked_endpoints: vec!["/wc/v3/orders/*".to_string()],
            ..AuditSettings::default()
        };

        assert!(!is_in_scope("/wc/v3/orders/55", &settings));
        assert!(is_in_scope("/wc/v3/products", &settings));
    }

    #[test]
    fn extra_namespaces_require_extended_capture() {
        let mut settings = AuditSettings {
            extra_namespaces: vec!["/custom/v1".to_string()],
            ..AuditSettings::default()
        };

        assert!(!is_in_scope("/custom/v1/things", &settings));

        settings.capture_extended = true;
        assert!(is_in_scope("/custom/v1/things", &settings));
        assert!(!is_in_scope("/other/v1/things", &settings));
    }

    #[test]
    fn route_index_filter_records_blocked_routes() {
        let scope = RouteScope::new();
        let settings = AuditSettings {
            blocked_endpoints: vec!["/wp/v2/users/*".to_string()],
            ..AuditSettings::default()
        };

        let kept = scope.filter_route_index(
            vec![
                "/wc/v3/orders".to_string(),
                "/wp/v2/users".to_string(),
                "/wp/v2/users/(?P<id>[\\d]+)".to_string(),
            ],
            &settings,
        );

        assert_eq!(kept, vec!["/wc/v3/orders".to_string()]);
        assert_eq!(
            scope.last_blocked_routes(),
            vec![
                "/wp/v2/users".to_string(),
                "/wp/v2/users/(?P<id>[\\d]+)".to_string()
            ]
        );
    }

    #[test]
    fn route_index_filter_clears_memory_without_patterns() {
        let scope = RouteScope::new();
        let blocking = AuditSettings {
            blocked_endpoints: vec!["/wp/*".to_string()],
            ..AuditSettings::default()
        };

        scope.filter_route_index(vec!["/wp/v2/posts".to_string()], &blocking);
        assert_eq!(scope.last_blocked_routes().len(), 1);

        scope.filter_route_index(vec!["/wp/v2/posts".to_string()], &AuditSettings::default());
        assert!(scope.last_blocked_routes().is_empty());
    }
}
