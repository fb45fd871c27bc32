//! Route lookup.
//!
//! # Responsibilities
//! - Partition routes into exact-host, wildcard-host and any-host bins
//! - Look up the matching route for an inbound (host, path)
//!
//! Immutable after construction, so the hot path takes no locks; the
//! live-state swap replaces whole tables.

use std::collections::HashMap;

use crate::config::model::Route;

struct WildcardBucket {
    /// `example.com` for routes matching `*.example.com`.
    suffix: String,
    routes: Vec<Route>,
}

/// Host + path-prefix route table.
pub struct RouteTable {
    by_host: HashMap<String, Vec<Route>>,
    /// Longest suffix first, so `*.a.example.com` beats `*.example.com`.
    wildcard: Vec<WildcardBucket>,
    any: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: &[Route]) -> Self {
        let mut by_host: HashMap<String, Vec<Route>> = HashMap::new();
        let mut wild_by_suffix: HashMap<String, Vec<Route>> = HashMap::new();
        let mut any = Vec::new();

        for r in routes {
            let host = r.host.trim().to_ascii_lowercase();
            if host.is_empty() {
                any.push(r.clone());
            } else if let Some(suffix) = host.strip_prefix("*.").filter(|s| !s.is_empty()) {
                wild_by_suffix
                    .entry(suffix.to_string())
                    .or_default()
                    .push(r.clone());
            } else {
                by_host.entry(host).or_default().push(r.clone());
            }
        }

        for routes in by_host.values_mut() {
            sort_by_prefix_len(routes);
        }
        let mut wildcard: Vec<WildcardBucket> = wild_by_suffix
            .into_iter()
            .map(|(suffix, mut routes)| {
                sort_by_prefix_len(&mut routes);
                WildcardBucket { suffix, routes }
            })
            .collect();
        wildcard.sort_by(|a, b| b.suffix.len().cmp(&a.suffix.len()));
        sort_by_prefix_len(&mut any);

        Self {
            by_host,
            wildcard,
            any,
        }
    }

    /// Return the route for `(host, path)`, or `None` (the caller answers
    /// 404). `host` may carry a `:port` suffix and any letter case.
    pub fn match_route(&self, host: &str, path: &str) -> Option<&Route> {
        let host = host_only(host).to_ascii_lowercase();
        if let Some(routes) = self.by_host.get(&host) {
            if let Some(r) = match_prefix(routes, path) {
                return Some(r);
            }
        }
        for bucket in &self.wildcard {
            if wildcard_host_match(&host, &bucket.suffix) {
                if let Some(r) = match_prefix(&bucket.routes, path) {
                    return Some(r);
                }
            }
        }
        match_prefix(&self.any, path)
    }
}

fn sort_by_prefix_len(routes: &mut [Route]) {
    routes.sort_by(|a, b| b.path_prefix.len().cmp(&a.path_prefix.len()));
}

fn match_prefix<'a>(routes: &'a [Route], path: &str) -> Option<&'a Route> {
    routes
        .iter()
        .find(|r| path_prefix_match(path, &r.path_prefix))
}

/// Path-segment prefix match, not a raw string prefix:
///
///   prefix "/api"  matches "/api", "/api/", "/api/v1" but NOT "/apiary"
///   prefix "/api/" matches "/api/v1" but NOT "/api"
///   prefix "/"     matches everything
fn path_prefix_match(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    let Some(rest) = path.strip_prefix(prefix) else {
        return false;
    };
    rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/')
}

/// `*.suffix` semantics: strict subdomains only.
///
///   "api.example.com" matches suffix "example.com"
///   "deep.api.example.com" matches suffix "example.com"
///   "example.com" does NOT match suffix "example.com"
fn wildcard_host_match(host: &str, suffix: &str) -> bool {
    if host.len() <= suffix.len() || suffix.is_empty() {
        return false;
    }
    let Some(rest) = host.strip_suffix(suffix) else {
        return false;
    };
    rest.ends_with('.')
}

/// Strip a `:port` suffix from an inbound Host value.
pub fn host_only(host: &str) -> &str {
    match host.find(':') {
        Some(i) => &host[..i],
        None => host,
    }
}
