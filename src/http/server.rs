//! L7 listener assembly.
//!
//! # Responsibilities
//! - Build the axum router: every method and path lands in the forwarder
//! - Serve plain listeners through `axum::serve` with connect info
//! - Serve TLS listeners through a tokio-rustls accept loop feeding
//!   hyper-util's auto (h1/h2) connection driver

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::routing::any;
use axum::Router;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tower_http::trace::TraceLayer;

use crate::http::forward::{forward, SharedGateway, TlsTerminated};
use crate::lifecycle::ShutdownSignal;

/// The gateway router: a catch-all dispatching into the forwarder.
pub fn router(gateway: SharedGateway) -> Router {
    Router::new()
        .route("/", any(forward))
        .route("/{*path}", any(forward))
        .with_state(gateway)
        .layer(TraceLayer::new_for_http())
}

/// Serve a plain-HTTP listener until the shutdown signal, then drain.
pub async fn serve_plain(
    listener: TcpListener,
    app: Router,
    mut shutdown: ShutdownSignal,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.triggered().await;
    })
    .await
}

/// Serve a TLS listener. ALPN offers h2 and http/1.1; the auto builder
/// speaks whichever the handshake selected.
pub async fn serve_tls(
    listener: TcpListener,
    app: Router,
    tls_config: Arc<rustls::ServerConfig>,
    mut shutdown: ShutdownSignal,
) -> std::io::Result<()> {
    let acceptor = TlsAcceptor::from(tls_config);
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.triggered() => break,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            },
        };
        let acceptor = acceptor.clone();
        let app = app.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(err) => {
                    tracing::debug!(peer = %peer, error = %err, "tls handshake failed");
                    return;
                }
            };
            serve_connection(tls_stream, peer, app).await;
        });
    }
    Ok(())
}

async fn serve_connection(
    stream: tokio_rustls::server::TlsStream<TcpStream>,
    peer: SocketAddr,
    app: Router,
) {
    let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
        let app = app.clone();
        // The plain path gets ConnectInfo from axum::serve; here both it
        // and the TLS marker are inserted by hand.
        req.extensions_mut().insert(ConnectInfo(peer));
        req.extensions_mut().insert(TlsTerminated);
        async move { app.oneshot(req.map(Body::new)).await }
    });
    let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());
    if let Err(err) = builder
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        tracing::debug!(peer = %peer, error = %err, "connection error");
    }
}
