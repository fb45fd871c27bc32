//! Configuration loading, normalization and validation.
//!
//! # Responsibilities
//! - Read and parse the YAML document
//! - Normalize raw values into the immutable model (lower-cased hosts,
//!   parsed endpoint URLs, defaulted weights, sorted routes)
//! - Reject semantically invalid configs with a precise error
//!
//! The loader is the only place a config can fail; everything downstream
//! trusts the model's invariants.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::model::{
    AccessLogPolicy, CertificatePaths, Config, Endpoint, Listener, PassiveHealth, Proto,
    RateLimitParams, Route, ServerTls, Service, Timeouts, TransportTuning, UpstreamTls,
};
use crate::config::schema::{RawConfig, RawEndpoint};

const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("{0}")]
    Invalid(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

/// Load and validate a configuration file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    from_yaml(&contents)
}

/// Parse and normalize a YAML document.
pub fn from_yaml(contents: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = serde_yaml::from_str(contents)?;
    normalize(raw)
}

fn normalize(raw: RawConfig) -> Result<Config, ConfigError> {
    // Listeners; a config without entrypoints gets one default L7 listener.
    let mut listeners = Vec::new();
    for ep in &raw.entrypoint {
        let address = normalize_address(ep.address.trim());
        listeners.push(Listener {
            name: ep.name.trim().to_string(),
            address: if address.is_empty() {
                DEFAULT_LISTEN_ADDRESS.to_string()
            } else {
                address
            },
            service: match ep.service.trim() {
                "" => None,
                s => Some(s.to_string()),
            },
        });
    }
    if listeners.is_empty() {
        listeners.push(Listener {
            name: "default".to_string(),
            address: DEFAULT_LISTEN_ADDRESS.to_string(),
            service: None,
        });
    }

    // Services.
    let mut services: HashMap<String, Service> = HashMap::new();
    for (i, s) in raw.services.iter().enumerate() {
        let name = s.name.trim().to_string();
        if name.is_empty() {
            return Err(invalid(format!("services[{i}]: name is required")));
        }
        let proto = match s.proto.trim().to_ascii_lowercase().as_str() {
            "" => Proto::Http1,
            p => Proto::parse(p)
                .ok_or_else(|| invalid(format!("services[{i}]: unknown proto {p:?}")))?,
        };
        if s.endpoints.is_empty() {
            return Err(invalid(format!("services[{i}]: endpoints is empty")));
        }
        let mut endpoints = Vec::with_capacity(s.endpoints.len());
        for (j, e) in s.endpoints.iter().enumerate() {
            let (raw_url, weight) = match e {
                RawEndpoint::Url(u) => (u.as_str(), 1),
                RawEndpoint::Weighted { url, weight } => {
                    (url.as_str(), if *weight <= 0 { 1 } else { *weight as u32 })
                }
            };
            let url = Url::parse(raw_url.trim())
                .map_err(|e| invalid(format!("services[{i}].endpoints[{j}]: parse: {e}")))?;
            let scheme_ok = matches!(url.scheme(), "http" | "https" | "tcp");
            if !scheme_ok || url.host_str().map_or(true, str::is_empty) {
                return Err(invalid(format!(
                    "services[{i}].endpoints[{j}]: must be http(s) or tcp URL with host"
                )));
            }
            endpoints.push(Endpoint { url, weight });
        }
        let tls_raw = &s.tls;
        let tls = if tls_raw.insecure_skip_verify
            || !tls_raw.ca_file.is_empty()
            || !tls_raw.cert_file.is_empty()
            || !tls_raw.key_file.is_empty()
        {
            Some(UpstreamTls {
                insecure_skip_verify: tls_raw.insecure_skip_verify,
                ca_file: tls_raw.ca_file.clone(),
                cert_file: tls_raw.cert_file.clone(),
                key_file: tls_raw.key_file.clone(),
            })
        } else {
            None
        };
        let defaults = PassiveHealth::default();
        let passive_health = PassiveHealth {
            max_fails: match s.passive_health.max_fails {
                Some(0) | None => defaults.max_fails,
                Some(n) => n,
            },
            cooldown: match &s.passive_health.cooldown {
                Some(d) => parse_duration(d)
                    .map_err(|e| invalid(format!("services[{i}].passive_health.cooldown: {e}")))?,
                None => defaults.cooldown,
            },
        };
        if services.contains_key(&name) {
            return Err(invalid(format!("services: duplicate name {name:?}")));
        }
        services.insert(
            name.clone(),
            Service {
                name,
                proto,
                endpoints,
                tls,
                passive_health,
            },
        );
    }
    if services.is_empty() {
        return Err(invalid("services: at least one is required"));
    }

    // Listeners naming a service must reference a tcp-capable one.
    for l in &listeners {
        if let Some(svc) = &l.service {
            if !services.contains_key(svc) {
                return Err(invalid(format!(
                    "entrypoint {:?}: service {svc:?} not found in services",
                    l.name
                )));
            }
        }
    }

    // Routes.
    let mut routes = Vec::with_capacity(raw.routes.len());
    for (i, r) in raw.routes.iter().enumerate() {
        let name = match r.name.trim() {
            "" => format!("route-{i}"),
            n => n.to_string(),
        };
        let path_prefix = r.matcher.path_prefix.trim().to_string();
        if !path_prefix.starts_with('/') {
            return Err(invalid(format!(
                "routes[{i}]: path_prefix must start with '/'"
            )));
        }
        let service = r.service.trim().to_string();
        if service.is_empty() {
            return Err(invalid(format!("routes[{i}]: service is required")));
        }
        if !services.contains_key(&service) {
            return Err(invalid(format!(
                "routes[{i}]: service={service:?} not found in services"
            )));
        }
        let rate_limit = match &r.rate_limit {
            Some(rl) => {
                if rl.requests_per_second <= 0.0 {
                    return Err(invalid(format!(
                        "routes[{i}]: rate_limit.requestsPerSecond must be > 0"
                    )));
                }
                Some(RateLimitParams {
                    requests_per_second: rl.requests_per_second,
                    burst: if rl.burst <= 0 { 1 } else { rl.burst as u32 },
                })
            }
            None => None,
        };
        routes.push(Route {
            name,
            host: r.matcher.host.trim().to_ascii_lowercase(),
            path_prefix,
            service,
            preserve_host: r.options.preserve_host,
            host_rewrite: r.options.host_rewrite.trim().to_string(),
            rate_limit,
        });
    }
    // Deterministic order: host ascending with the empty (any) host last,
    // then longer prefixes first. Stable, so input order breaks ties.
    routes.sort_by(|a, b| {
        (a.host.is_empty(), &a.host, Reverse(a.path_prefix.len())).cmp(&(
            b.host.is_empty(),
            &b.host,
            Reverse(b.path_prefix.len()),
        ))
    });

    // Timeouts.
    let defaults = Timeouts::default();
    let timeouts = Timeouts {
        read: duration_field(&raw.timeouts.read, defaults.read, "timeouts.read")?,
        write: duration_field(&raw.timeouts.write, defaults.write, "timeouts.write")?,
        upstream: duration_field(&raw.timeouts.upstream, Duration::ZERO, "timeouts.upstream")?,
        tcp_idle: duration_field(&raw.timeouts.tcp_idle, Duration::ZERO, "timeouts.tcp_idle")?,
        tcp_connection: duration_field(
            &raw.timeouts.tcp_connection,
            Duration::ZERO,
            "timeouts.tcp_connection",
        )?,
    };

    // Downstream TLS.
    let mut tls = ServerTls {
        enabled: raw.tls.enabled,
        certificates: Vec::new(),
    };
    if tls.enabled {
        for (i, c) in raw.tls.certificates.iter().enumerate() {
            if c.cert_file.is_empty() || c.key_file.is_empty() {
                return Err(invalid(format!(
                    "tls.certificates[{i}]: cert_file and key_file are required"
                )));
            }
            tls.certificates.push(CertificatePaths {
                cert_file: c.cert_file.clone(),
                key_file: c.key_file.clone(),
            });
        }
        if tls.certificates.is_empty() {
            return Err(invalid("tls.enabled is true but no certificates provided"));
        }
    }

    // Access log.
    let access_log = AccessLogPolicy {
        sampling: match raw.access_log.sampling {
            Some(s) if !(0.0..=1.0).contains(&s) => {
                return Err(invalid("access_log.sampling must be within [0, 1]"))
            }
            Some(s) => s,
            None => 1.0,
        },
        fields: raw.access_log.fields.clone(),
    };

    // Transport tuning.
    let td = TransportTuning::default();
    let transport = TransportTuning {
        max_idle_conns: raw.transport.max_idle_conns.unwrap_or(td.max_idle_conns),
        max_idle_conns_per_host: raw
            .transport
            .max_idle_conns_per_host
            .unwrap_or(td.max_idle_conns_per_host),
        idle_conn_timeout: duration_field(
            &raw.transport.idle_conn_timeout,
            td.idle_conn_timeout,
            "transport.idle_conn_timeout",
        )?,
        dial_timeout: duration_field(
            &raw.transport.dial_timeout,
            td.dial_timeout,
            "transport.dial_timeout",
        )?,
        dial_keep_alive: duration_field(
            &raw.transport.dial_keep_alive,
            td.dial_keep_alive,
            "transport.dial_keep_alive",
        )?,
    };

    let refresh_interval = match &raw.refresh_interval {
        Some(d) => parse_duration(d).map_err(|e| invalid(format!("refresh_interval: {e}")))?,
        None => DEFAULT_REFRESH_INTERVAL,
    };

    Ok(Config {
        listeners,
        services,
        routes,
        timeouts,
        tls,
        metrics_address: match raw.metrics.address.trim() {
            "" => None,
            a => Some(a.to_string()),
        },
        access_log,
        transport,
        refresh_interval,
    })
}

fn duration_field(raw: &str, default: Duration, field: &str) -> Result<Duration, ConfigError> {
    if raw.is_empty() {
        return Ok(default);
    }
    parse_duration(raw).map_err(|e| invalid(format!("{field}: {e}")))
}

/// Parse a duration string such as `500ms`, `15s`, `1.5m` or `2h`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (number, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(idx) => s.split_at(idx),
        None => return Err(format!("missing unit in duration {s:?}")),
    };
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    if value < 0.0 {
        return Err(format!("negative duration {s:?}"));
    }
    let secs = match unit {
        "ms" => value / 1000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(format!("unknown unit {unit:?} in duration {s:?}")),
    };
    Ok(Duration::from_secs_f64(secs))
}

/// A bare `:port` listen address binds on all interfaces.
fn normalize_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}
