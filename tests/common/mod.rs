//! Shared utilities for the integration tests: mock upstreams, a raw HTTP
//! client, and a one-call gateway bootstrap.
//!
//! Each integration binary pulls in the subset it needs.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use edgegate::config::loader::from_yaml;
use edgegate::http::{router, serve_plain, Gateway, SharedGateway};
use edgegate::lifecycle::ShutdownController;
use edgegate::observability::{AccessLogger, MetricsRegistry};
use edgegate::security::RateLimiter;
use edgegate::state::{LiveState, StateHolder};
use edgegate::transport::Transports;

/// What a mock upstream saw for one request.
#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> &str {
        self.request_line.split(' ').nth(1).unwrap_or("")
    }
}

/// Start a programmable HTTP/1.1 upstream on an ephemeral port. The
/// handler sees the parsed request head and returns (status, body).
pub async fn spawn_upstream<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(ReceivedRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let Some(request) = read_request_head(&mut socket).await else {
                    return;
                };
                let (status, body) = handler(request).await;
                let reason = match status {
                    200 => "OK",
                    404 => "Not Found",
                    429 => "Too Many Requests",
                    500 => "Internal Server Error",
                    502 => "Bad Gateway",
                    503 => "Service Unavailable",
                    _ => "OK",
                };
                let response = format!(
                    "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Fixed-response upstream.
pub async fn spawn_static_upstream(status: u16, body: &'static str) -> SocketAddr {
    spawn_upstream(move |_req| async move { (status, body.to_string()) }).await
}

async fn read_request_head(socket: &mut TcpStream) -> Option<ReceivedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.len() > 64 * 1024 {
            return None;
        }
    }
    let head_end = buf.windows(4).position(|w| w == b"\r\n\r\n")?;
    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?.to_string();
    let headers = lines
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim().to_string(), v.trim().to_string()))
        })
        .collect();
    Some(ReceivedRequest {
        request_line,
        headers,
    })
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub gateway: SharedGateway,
    pub shutdown: ShutdownController,
}

/// Build a gateway from inline YAML and serve it on an ephemeral port.
pub async fn start_gateway(yaml: &str) -> TestGateway {
    let cfg = from_yaml(yaml).expect("test config must parse");
    let gateway = Arc::new(Gateway {
        state: StateHolder::new(LiveState::build(&cfg)),
        transports: Transports::new(cfg.transport, &cfg.services),
        limiter: RateLimiter::new(),
        metrics: MetricsRegistry::new(),
        access_log: AccessLogger::from_writer(Box::new(std::io::sink())),
    });
    let app = router(gateway.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = ShutdownController::new();
    let signal = shutdown.signal();
    tokio::spawn(async move {
        let _ = serve_plain(listener, app, signal).await;
    });
    TestGateway {
        addr,
        gateway,
        shutdown,
    }
}

/// A parsed raw-socket HTTP response.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// Send a raw HTTP/1.1 request and read the full response. Used where a
/// real client would sanitize hop-by-hop headers before we can test them.
pub async fn raw_request(addr: SocketAddr, request: &str) -> RawResponse {
    let mut socket = TcpStream::connect(addr).await.unwrap();
    socket.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    socket.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response).to_string();

    let status = text
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let body = text
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_default();
    RawResponse { status, body }
}

/// GET with host + connection-close, the common case.
pub async fn raw_get(addr: SocketAddr, host: &str, path: &str) -> RawResponse {
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    raw_request(addr, &request).await
}
