//! Gateway entrypoint: config, wiring, listeners, shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edgegate::config::{self, Config};
use edgegate::http::{self, Gateway};
use edgegate::lifecycle::{self, ShutdownController};
use edgegate::load_balancer::SmoothWrr;
use edgegate::net::TcpProxy;
use edgegate::observability::{metrics, AccessLogger, MetricsRegistry};
use edgegate::security::RateLimiter;
use edgegate::state::{LiveState, StateHolder};
use edgegate::transport::{tls, Transports};

#[derive(Parser)]
#[command(name = "edgegate")]
#[command(about = "Dual-layer gateway: L7 HTTP reverse proxy + L4 TCP proxy", long_about = None)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgegate=info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        listeners = cfg.listeners.len(),
        services = cfg.services.len(),
        routes = cfg.routes.len(),
        "edgegate starting"
    );

    let metrics_registry = MetricsRegistry::new();
    if let Some(addr) = &cfg.metrics_address {
        let addr = addr.parse()?;
        tokio::spawn(metrics::serve(metrics_registry.clone(), addr));
    }

    let gateway = Arc::new(Gateway {
        state: StateHolder::new(LiveState::build(&cfg)),
        transports: Transports::new(cfg.transport, &cfg.services),
        limiter: RateLimiter::new(),
        metrics: metrics_registry.clone(),
        access_log: AccessLogger::stdout(),
    });

    spawn_config_watcher(&cli.config, &cfg, gateway.clone());

    let shutdown = ShutdownController::new();
    let mut server_tasks = Vec::new();

    // Downstream TLS material is loaded once; listeners share it.
    let server_tls = if cfg.tls.enabled {
        Some(Arc::new(tls::server_config(&cfg.tls.certificates)?))
    } else {
        None
    };

    for listener_cfg in &cfg.listeners {
        let listener = TcpListener::bind(&listener_cfg.address).await.map_err(|e| {
            format!("listener {}: bind {}: {e}", listener_cfg.name, listener_cfg.address)
        })?;

        match &listener_cfg.service {
            Some(service_name) => {
                let service = cfg
                    .services
                    .get(service_name)
                    .expect("validated at load time");
                let proxy = TcpProxy::new(
                    listener_cfg.name.clone(),
                    service_name.clone(),
                    SmoothWrr::for_service(service),
                    cfg.timeouts.tcp_idle,
                    cfg.timeouts.tcp_connection,
                    metrics_registry.clone(),
                );
                tracing::info!(
                    listener = %listener_cfg.name,
                    address = %listener_cfg.address,
                    service = %service_name,
                    "L4 listener ready"
                );
                server_tasks.push(tokio::spawn(proxy.run(listener, shutdown.signal())));
            }
            None => {
                let app = http::router(gateway.clone());
                tracing::info!(
                    listener = %listener_cfg.name,
                    address = %listener_cfg.address,
                    tls = cfg.tls.enabled,
                    "L7 listener ready"
                );
                let rx = shutdown.signal();
                let task = match &server_tls {
                    Some(tls_config) => {
                        let tls_config = tls_config.clone();
                        tokio::spawn(async move {
                            if let Err(err) = http::serve_tls(listener, app, tls_config, rx).await {
                                tracing::error!(error = %err, "tls listener error");
                            }
                        })
                    }
                    None => tokio::spawn(async move {
                        if let Err(err) = http::serve_plain(listener, app, rx).await {
                            tracing::error!(error = %err, "listener error");
                        }
                    }),
                };
                server_tasks.push(task);
            }
        }
    }

    lifecycle::wait_for_signal().await;
    shutdown.drain(server_tasks).await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Reload path: rebuild transports for the new service set, then publish a
/// freshly built live state. Invalid configs never reach this callback.
fn spawn_config_watcher(path: &PathBuf, cfg: &Config, gateway: Arc<Gateway>) {
    let path = path.clone();
    let interval = cfg.refresh_interval;
    tokio::spawn(async move {
        config::watcher::watch(path, interval, move |new_cfg: Config| {
            gateway.transports.apply(&new_cfg.services);
            gateway.state.publish(LiveState::build(&new_cfg));
        })
        .await;
    });
}
