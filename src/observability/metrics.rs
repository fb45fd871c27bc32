//! Process-wide metrics registry and Prometheus text exposition.
//!
//! Three families: `requests_total` (counter), `active_connections`
//! (gauge), `upstream_latency_seconds` (histogram). Series are keyed as
//! `name|labels` under one reader-writer lock; updates take the write
//! side, a scrape takes the read side. Exposition renders each family in
//! sorted-key order.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::routing::get;
use axum::Router;

/// Latency buckets in seconds.
const LATENCY_BUCKETS: [f64; 11] = [0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

#[derive(Default)]
struct Histogram {
    count: u64,
    sum: f64,
    bucket_counts: [u64; LATENCY_BUCKETS.len()],
}

#[derive(Default)]
struct Inner {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, i64>,
    histograms: HashMap<String, Histogram>,
}

#[derive(Default)]
pub struct MetricsRegistry {
    inner: RwLock<Inner>,
}

impl MetricsRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_request(&self, service: &str, route: &str, method: &str, status: u16) {
        let key = format!(
            "requests_total|service=\"{service}\",route=\"{route}\",method=\"{method}\",status=\"{status}\""
        );
        let mut inner = self.inner.write().expect("metrics registry poisoned");
        *inner.counters.entry(key).or_insert(0) += 1;
    }

    pub fn inc_active_connections(&self, listener: &str, service: &str) {
        self.add_active_connections(listener, service, 1);
    }

    pub fn dec_active_connections(&self, listener: &str, service: &str) {
        self.add_active_connections(listener, service, -1);
    }

    fn add_active_connections(&self, listener: &str, service: &str, delta: i64) {
        let key = format!("active_connections|listener=\"{listener}\",service=\"{service}\"");
        let mut inner = self.inner.write().expect("metrics registry poisoned");
        *inner.gauges.entry(key).or_insert(0) += delta;
    }

    pub fn observe_latency(&self, service: &str, route: &str, seconds: f64) {
        let key = format!("upstream_latency_seconds|service=\"{service}\",route=\"{route}\"");
        let mut inner = self.inner.write().expect("metrics registry poisoned");
        let h = inner.histograms.entry(key).or_default();
        h.count += 1;
        h.sum += seconds;
        for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
            if seconds <= *bound {
                h.bucket_counts[i] += 1;
            }
        }
    }

    /// Render the whole registry in Prometheus text format.
    pub fn render(&self) -> String {
        let inner = self.inner.read().expect("metrics registry poisoned");
        let mut out = String::new();

        if !inner.counters.is_empty() {
            out.push_str("# HELP requests_total Total number of requests\n");
            out.push_str("# TYPE requests_total counter\n");
            for key in sorted_keys(&inner.counters) {
                let (name, labels) = split_key(key);
                let _ = writeln!(out, "{name}{{{labels}}} {}", inner.counters[key]);
            }
        }

        if !inner.gauges.is_empty() {
            out.push_str("# HELP active_connections Number of active connections\n");
            out.push_str("# TYPE active_connections gauge\n");
            for key in sorted_keys(&inner.gauges) {
                let (name, labels) = split_key(key);
                let _ = writeln!(out, "{name}{{{labels}}} {}", inner.gauges[key]);
            }
        }

        if !inner.histograms.is_empty() {
            out.push_str("# HELP upstream_latency_seconds Upstream latency in seconds\n");
            out.push_str("# TYPE upstream_latency_seconds histogram\n");
            for key in sorted_keys(&inner.histograms) {
                let (name, labels) = split_key(key);
                let h = &inner.histograms[key];
                for (i, bound) in LATENCY_BUCKETS.iter().enumerate() {
                    let _ = writeln!(
                        out,
                        "{name}_bucket{{{labels},le=\"{bound}\"}} {}",
                        h.bucket_counts[i]
                    );
                }
                let _ = writeln!(out, "{name}_bucket{{{labels},le=\"+Inf\"}} {}", h.count);
                let _ = writeln!(out, "{name}_sum{{{labels}}} {}", h.sum);
                let _ = writeln!(out, "{name}_count{{{labels}}} {}", h.count);
            }
        }

        out
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

fn split_key(key: &str) -> (&str, &str) {
    key.split_once('|').unwrap_or((key, ""))
}

/// Serve `GET /metrics` on `addr` until the process exits. Endpoint errors
/// never affect request serving; they are only logged.
pub async fn serve(registry: Arc<MetricsRegistry>, addr: SocketAddr) {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let registry = registry.clone();
            async move { registry.render() }
        }),
    );
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            tracing::error!(address = %addr, error = %err, "metrics server failed to bind");
            return;
        }
    };
    tracing::info!(address = %addr, "metrics server listening");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(error = %err, "metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_sorted() {
        let m = MetricsRegistry::new();
        m.inc_request("svc-b", "r1", "GET", 200);
        m.inc_request("svc-a", "r1", "GET", 200);
        m.inc_request("svc-a", "r1", "GET", 200);
        let text = m.render();
        let a = text
            .find("requests_total{service=\"svc-a\",route=\"r1\",method=\"GET\",status=\"200\"} 2")
            .unwrap();
        let b = text
            .find("requests_total{service=\"svc-b\",route=\"r1\",method=\"GET\",status=\"200\"} 1")
            .unwrap();
        assert!(a < b);
        assert!(text.contains("# TYPE requests_total counter"));
    }

    #[test]
    fn gauge_tracks_increments_and_decrements() {
        let m = MetricsRegistry::new();
        m.inc_active_connections("tcp-in", "db");
        m.inc_active_connections("tcp-in", "db");
        m.dec_active_connections("tcp-in", "db");
        let text = m.render();
        assert!(text.contains("active_connections{listener=\"tcp-in\",service=\"db\"} 1"));
        assert!(text.contains("# TYPE active_connections gauge"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let m = MetricsRegistry::new();
        m.observe_latency("svc", "r", 0.25);
        m.observe_latency("svc", "r", 0.5);
        m.observe_latency("svc", "r", 8.0);
        let text = m.render();
        assert!(text.contains(
            "upstream_latency_seconds_bucket{service=\"svc\",route=\"r\",le=\"0.1\"} 0"
        ));
        assert!(text.contains(
            "upstream_latency_seconds_bucket{service=\"svc\",route=\"r\",le=\"0.25\"} 1"
        ));
        assert!(text.contains(
            "upstream_latency_seconds_bucket{service=\"svc\",route=\"r\",le=\"0.5\"} 2"
        ));
        assert!(text.contains(
            "upstream_latency_seconds_bucket{service=\"svc\",route=\"r\",le=\"10\"} 3"
        ));
        assert!(text.contains(
            "upstream_latency_seconds_bucket{service=\"svc\",route=\"r\",le=\"+Inf\"} 3"
        ));
        assert!(text.contains("upstream_latency_seconds_count{service=\"svc\",route=\"r\"} 3"));
        assert!(text.contains("upstream_latency_seconds_sum{service=\"svc\",route=\"r\"} 8.75"));
    }

    #[test]
    fn empty_registry_renders_nothing() {
        assert_eq!(MetricsRegistry::new().render(), "");
    }
}
