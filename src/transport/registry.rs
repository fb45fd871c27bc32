//! Outbound HTTP client registry.
//!
//! # Responsibilities
//! - Maintain one pooled client per service, keyed by service name
//! - Provide the three protocol classes: `http1` (ALPN http/1.1 only),
//!   `auto` (ALPN h2 + http/1.1), `h2c` (prior-knowledge HTTP/2 over TCP)
//! - Rebuild clients whose TLS material changed on reload
//!
//! `get` falls back to the shared http1 client for unknown names, so the
//! forwarder never has to handle a missing transport.

use std::collections::HashMap;
use std::sync::RwLock;

use axum::body::Body;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;

use crate::config::model::{Proto, Service, TransportTuning};
use crate::transport::tls;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

pub struct Transports {
    tuning: TransportTuning,
    http1: HttpClient,
    auto: HttpClient,
    h2c: HttpClient,
    clients: RwLock<HashMap<String, HttpClient>>,
}

impl Transports {
    /// Build the shared protocol-class clients and register one client per
    /// service from the initial config.
    pub fn new(tuning: TransportTuning, services: &HashMap<String, Service>) -> Self {
        let registry = Self {
            tuning,
            http1: build_client(&tuning, Proto::Http1, tls::default_client_config()),
            auto: build_client(&tuning, Proto::Auto, tls::default_client_config()),
            h2c: build_client(&tuning, Proto::H2c, tls::default_client_config()),
            clients: RwLock::new(HashMap::new()),
        };
        registry.apply(services);
        registry
    }

    /// Client for a service; unknown names fall back to the http1 default.
    pub fn get(&self, service: &str) -> HttpClient {
        let clients = self.clients.read().expect("transport registry poisoned");
        clients
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.http1.clone())
    }

    /// (Re-)register clients for every non-tcp service. Services with TLS
    /// material get a dedicated client; a service whose material fails to
    /// load keeps its previous registration. Replaced clients drop their
    /// pools once in-flight requests finish, which is this registry's
    /// equivalent of closing idle connections.
    pub fn apply(&self, services: &HashMap<String, Service>) {
        for svc in services.values() {
            if svc.proto == Proto::Tcp {
                continue;
            }
            let client = match &svc.tls {
                Some(material) => match tls::client_config(material) {
                    Ok(config) => build_client(&self.tuning, svc.proto, config),
                    Err(err) => {
                        tracing::warn!(
                            service = %svc.name,
                            error = %err,
                            "keeping previous transport, tls material failed to load"
                        );
                        continue;
                    }
                },
                None => self.class_client(svc.proto),
            };
            self.clients
                .write()
                .expect("transport registry poisoned")
                .insert(svc.name.clone(), client);
        }
    }

    fn class_client(&self, proto: Proto) -> HttpClient {
        match proto {
            Proto::Auto => self.auto.clone(),
            Proto::H2c => self.h2c.clone(),
            Proto::Http1 | Proto::Tcp => self.http1.clone(),
        }
    }
}

fn build_client(
    tuning: &TransportTuning,
    proto: Proto,
    tls_config: rustls::ClientConfig,
) -> HttpClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    if tuning.dial_timeout > std::time::Duration::ZERO {
        http.set_connect_timeout(Some(tuning.dial_timeout));
    }
    if tuning.dial_keep_alive > std::time::Duration::ZERO {
        http.set_keepalive(Some(tuning.dial_keep_alive));
    }

    // The connector builder owns ALPN: http/1.1 only for the http1 class,
    // h2 + http/1.1 for auto. h2c never negotiates TLS, so its connector
    // settings are inert.
    let builder = HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_or_http();
    let connector = match proto {
        Proto::Auto => builder.enable_all_versions().wrap_connector(http),
        Proto::Http1 | Proto::H2c | Proto::Tcp => builder.enable_http1().wrap_connector(http),
    };

    let mut client = Client::builder(TokioExecutor::new());
    client
        .pool_max_idle_per_host(tuning.max_idle_conns_per_host)
        .pool_idle_timeout(tuning.idle_conn_timeout);
    if proto == Proto::H2c {
        client.http2_only(true);
    }
    client.build(connector)
}
