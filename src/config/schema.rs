//! Raw configuration schema as it appears on disk.
//!
//! These types mirror the YAML document one-to-one and stay permissive;
//! all normalization and semantic validation happens in the loader.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub entrypoint: Vec<RawEntrypoint>,
    pub services: Vec<RawService>,
    pub routes: Vec<RawRoute>,
    pub timeouts: RawTimeouts,
    pub tls: RawServerTls,
    pub metrics: RawMetrics,
    pub access_log: RawAccessLog,
    pub transport: RawTransport,
    pub refresh_interval: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEntrypoint {
    pub name: String,
    pub address: String,
    pub service: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawService {
    pub name: String,
    pub proto: String,
    pub endpoints: Vec<RawEndpoint>,
    pub tls: RawUpstreamTls,
    pub passive_health: RawPassiveHealth,
}

/// Endpoints accept either a bare URL string or `{url, weight}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawEndpoint {
    Url(String),
    Weighted {
        url: String,
        #[serde(default)]
        weight: i64,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawUpstreamTls {
    pub insecure_skip_verify: bool,
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPassiveHealth {
    pub max_fails: Option<u32>,
    pub cooldown: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRoute {
    pub name: String,
    #[serde(rename = "match")]
    pub matcher: RawRouteMatch,
    pub service: String,
    pub options: RawRouteOptions,
    pub rate_limit: Option<RawRateLimit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRouteMatch {
    pub host: String,
    pub path_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRouteOptions {
    pub preserve_host: bool,
    pub host_rewrite: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRateLimit {
    #[serde(rename = "requestsPerSecond")]
    pub requests_per_second: f64,
    pub burst: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTimeouts {
    pub read: String,
    pub write: String,
    pub upstream: String,
    pub tcp_idle: String,
    pub tcp_connection: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawServerTls {
    pub enabled: bool,
    pub certificates: Vec<RawCertificate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawCertificate {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawMetrics {
    pub address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawAccessLog {
    pub sampling: Option<f64>,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawTransport {
    pub max_idle_conns: Option<usize>,
    pub max_idle_conns_per_host: Option<usize>,
    pub idle_conn_timeout: String,
    pub dial_timeout: String,
    pub dial_keep_alive: String,
}
