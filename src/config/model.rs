//! Normalized configuration model.
//!
//! Everything in here is produced by the loader and immutable afterwards.
//! The raw on-disk shapes live in [`crate::config::schema`].

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

/// A fully normalized configuration, ready to build runtime state from.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listeners in file order. Always non-empty (a default is synthesized).
    pub listeners: Vec<Listener>,
    /// Services keyed by name.
    pub services: HashMap<String, Service>,
    /// Routes sorted by host ascending (empty host last), then by
    /// path-prefix length descending; ties keep input order.
    pub routes: Vec<Route>,
    pub timeouts: Timeouts,
    pub tls: ServerTls,
    /// Prometheus exposition address; `None` disables the endpoint.
    pub metrics_address: Option<String>,
    pub access_log: AccessLogPolicy,
    pub transport: TransportTuning,
    /// Config-file poll period for hot reload.
    pub refresh_interval: Duration,
}

/// An entrypoint. With `service` set the listener is an L4 TCP proxy for
/// that service; otherwise it serves L7 HTTP against the global route table.
#[derive(Debug, Clone)]
pub struct Listener {
    pub name: String,
    pub address: String,
    pub service: Option<String>,
}

/// Outbound protocol class for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Http1,
    Auto,
    H2c,
    Tcp,
}

impl Proto {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http1" => Some(Proto::Http1),
            "auto" => Some(Proto::Auto),
            "h2c" => Some(Proto::H2c),
            "tcp" => Some(Proto::Tcp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Proto::Http1 => "http1",
            Proto::Auto => "auto",
            Proto::H2c => "h2c",
            Proto::Tcp => "tcp",
        }
    }
}

/// Named upstream pool.
#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub proto: Proto,
    /// Non-empty; order matters for the balancer's deterministic sequence.
    pub endpoints: Vec<Endpoint>,
    pub tls: Option<UpstreamTls>,
    pub passive_health: PassiveHealth,
}

/// One upstream target.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Absolute URL, scheme in {http, https, tcp}, non-empty host.
    pub url: Url,
    /// Positive; absent or non-positive inputs normalize to 1.
    pub weight: u32,
}

impl Endpoint {
    /// `host` or `host:port` as it appears in the URL.
    pub fn authority(&self) -> String {
        let host = self.url.host_str().unwrap_or_default();
        match self.url.port() {
            Some(p) => format!("{host}:{p}"),
            None => host.to_string(),
        }
    }
}

/// Per-service outbound TLS material (file paths, loaded lazily by the
/// transport registry).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamTls {
    pub insecure_skip_verify: bool,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
}

/// Passive health-ejection thresholds for one service's balancer.
#[derive(Debug, Clone, Copy)]
pub struct PassiveHealth {
    /// Consecutive failures before ejection.
    pub max_fails: u32,
    /// How long an ejected peer stays out of rotation.
    pub cooldown: Duration,
}

impl Default for PassiveHealth {
    fn default() -> Self {
        Self {
            max_fails: 3,
            cooldown: Duration::from_secs(10),
        }
    }
}

/// L7 matching rule plus forwarding options.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    /// Lower-cased. Empty matches any host; `*.suffix` matches strict
    /// subdomains of `suffix`.
    pub host: String,
    /// Starts with `/`; matched as a path-segment prefix.
    pub path_prefix: String,
    /// Key into the service map; validated at load time.
    pub service: String,
    pub preserve_host: bool,
    /// Wins over `preserve_host` when non-empty.
    pub host_rewrite: String,
    pub rate_limit: Option<RateLimitParams>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitParams {
    pub requests_per_second: f64,
    pub burst: u32,
}

/// Server-side and L4 deadlines. `Duration::ZERO` means disabled.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
    pub upstream: Duration,
    pub tcp_idle: Duration,
    pub tcp_connection: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(15),
            write: Duration::from_secs(30),
            upstream: Duration::ZERO,
            tcp_idle: Duration::ZERO,
            tcp_connection: Duration::ZERO,
        }
    }
}

/// Downstream TLS termination.
#[derive(Debug, Clone, Default)]
pub struct ServerTls {
    pub enabled: bool,
    pub certificates: Vec<CertificatePaths>,
}

#[derive(Debug, Clone)]
pub struct CertificatePaths {
    pub cert_file: String,
    pub key_file: String,
}

/// Access-log emission policy.
#[derive(Debug, Clone)]
pub struct AccessLogPolicy {
    /// Emission probability in [0, 1].
    pub sampling: f64,
    /// Allow-list of record fields; empty emits the full record.
    pub fields: Vec<String>,
}

impl Default for AccessLogPolicy {
    fn default() -> Self {
        Self {
            sampling: 1.0,
            fields: Vec::new(),
        }
    }
}

/// Outbound connection-pool tuning shared by all transports.
#[derive(Debug, Clone, Copy)]
pub struct TransportTuning {
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub idle_conn_timeout: Duration,
    pub dial_timeout: Duration,
    pub dial_keep_alive: Duration,
}

impl Default for TransportTuning {
    fn default() -> Self {
        Self {
            max_idle_conns: 512,
            max_idle_conns_per_host: 128,
            idle_conn_timeout: Duration::from_secs(90),
            dial_timeout: Duration::from_secs(5),
            dial_keep_alive: Duration::from_secs(60),
        }
    }
}
