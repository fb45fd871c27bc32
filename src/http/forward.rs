//! The L7 forwarding engine.
//!
//! # Responsibilities
//! - Snapshot the live state once per request
//! - Match a route, apply its rate limit, pick a healthy endpoint
//! - Rewrite the request (hop-by-hop hygiene, X-Forwarded-*, host policy,
//!   upstream URL) and drive it through the service's transport
//! - Map the upstream response back, keeping trailers flowing
//! - Finalize every request exactly once: one access-log record and one
//!   set of metrics updates, even when the client walks away mid-body

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, HOST, REFERER, TRAILER, USER_AGENT};
use http::uri::Uri;
use http_body::{Frame, SizeHint};

use crate::config::model::AccessLogPolicy;
use crate::http::headers;
use crate::observability::{AccessLogger, AccessRecord, MetricsRegistry};
use crate::security::RateLimiter;
use crate::state::StateHolder;
use crate::transport::Transports;

/// Request-extension marker set by TLS listeners; drives X-Forwarded-Proto.
#[derive(Debug, Clone, Copy)]
pub struct TlsTerminated;

/// Shared context behind every L7 listener.
pub struct Gateway {
    pub state: StateHolder,
    pub transports: Transports,
    pub limiter: RateLimiter,
    pub metrics: Arc<MetricsRegistry>,
    pub access_log: AccessLogger,
}

pub type SharedGateway = Arc<Gateway>;

/// Handler for every inbound L7 request, any method, any path.
pub async fn forward(
    State(gateway): State<SharedGateway>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let state = gateway.state.snapshot();
    let start = Instant::now();

    let host = inbound_host(&req);
    let path = req.uri().path().to_string();
    let tls_terminated = req.extensions().get::<TlsTerminated>().is_some();

    let mut fin = Finalizer {
        done: false,
        start,
        time: Utc::now(),
        method: req.method().to_string(),
        path: path.clone(),
        protocol: format!("{:?}", req.version()),
        status: 0,
        remote_ip: peer.ip().to_string(),
        user_agent: header_str(&req, USER_AGENT),
        referer: header_str(&req, REFERER),
        service: String::new(),
        route: String::new(),
        upstream: String::new(),
        bytes: 0,
        metrics: gateway.metrics.clone(),
        logger: gateway.access_log.clone(),
        policy: state.access_log.clone(),
    };

    let Some(route) = state.table.match_route(&host, &path) else {
        return error_response(fin, StatusCode::NOT_FOUND, "404 page not found");
    };
    fin.route = route.name.clone();
    fin.service = route.service.clone();

    if let Some(limit) = route.rate_limit {
        if !gateway
            .limiter
            .allow(&route.name, limit.requests_per_second, limit.burst)
        {
            tracing::debug!(route = %route.name, "rate limit exceeded");
            return error_response(fin, StatusCode::TOO_MANY_REQUESTS, "Too Many Requests");
        }
    }

    let Some(service) = state.services.get(&route.service) else {
        return error_response(fin, StatusCode::BAD_GATEWAY, "Bad Gateway");
    };
    if service.endpoints.is_empty() {
        return error_response(fin, StatusCode::BAD_GATEWAY, "Bad Gateway");
    }
    let Some(peer_handle) = state.balancers.get(&route.service).and_then(|b| b.next()) else {
        tracing::info!(service = %route.service, "no healthy upstream endpoint");
        return error_response(fin, StatusCode::BAD_GATEWAY, "Bad Gateway");
    };

    // Upstream URL: endpoint scheme/authority, joined path, original query.
    let endpoint = peer_handle.endpoint();
    let authority = endpoint.authority();
    let joined = headers::join_path(endpoint.url.path(), &path);
    let path_and_query = match req.uri().query() {
        Some(q) => format!("{joined}?{q}"),
        None => joined,
    };
    let uri = match Uri::builder()
        .scheme(endpoint.url.scheme())
        .authority(authority.as_str())
        .path_and_query(path_and_query.as_str())
        .build()
    {
        Ok(uri) => uri,
        Err(err) => {
            tracing::warn!(error = %err, "invalid upstream url");
            return error_response(fin, StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };
    fin.upstream = uri.to_string();

    let (parts, body) = req.into_parts();
    let mut out_headers = parts.headers;
    headers::scrub_hop_by_hop(&mut out_headers);
    headers::append_forwarded_for(&mut out_headers, &fin.remote_ip);
    headers::set_forwarded_host(&mut out_headers, &host);
    headers::set_forwarded_proto(&mut out_headers, tls_terminated);

    // Host policy: an explicit rewrite wins, then preserve-host, then the
    // endpoint's own authority.
    let host_value = if !route.host_rewrite.is_empty() {
        route.host_rewrite.clone()
    } else if route.preserve_host {
        host.clone()
    } else {
        authority.clone()
    };
    match HeaderValue::from_str(&host_value) {
        Ok(v) => {
            out_headers.insert(HOST, v);
        }
        Err(_) => {
            out_headers.remove(HOST);
        }
    }

    let mut upstream_req = Request::new(body);
    *upstream_req.method_mut() = parts.method;
    *upstream_req.uri_mut() = uri;
    *upstream_req.headers_mut() = out_headers;

    // The upstream call honors client disconnect through future drop; a
    // configured upstream timeout adds a hard deadline on top.
    let client = gateway.transports.get(&route.service);
    let result = if state.upstream_timeout > Duration::ZERO {
        match tokio::time::timeout(state.upstream_timeout, client.request(upstream_req)).await {
            Ok(res) => res.map_err(|e| e.to_string()),
            Err(_) => Err(format!(
                "deadline of {:?} exceeded",
                state.upstream_timeout
            )),
        }
    } else {
        client.request(upstream_req).await.map_err(|e| e.to_string())
    };

    let upstream_res = match result {
        Ok(res) => res,
        Err(err) => {
            tracing::info!(upstream = %fin.upstream, error = %err, "upstream error");
            peer_handle.feedback(false);
            return error_response(fin, StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };

    let status = upstream_res.status();
    peer_handle.feedback(status.as_u16() < 500);
    fin.status = status.as_u16();

    let (mut res_parts, res_body) = upstream_res.into_parts();
    // Re-announce trailers after the scrub removes the Trailer header; the
    // trailer frames themselves ride along inside the streamed body.
    let announced: Vec<HeaderValue> = res_parts.headers.get_all(TRAILER).iter().cloned().collect();
    headers::scrub_hop_by_hop(&mut res_parts.headers);
    for value in announced {
        res_parts.headers.append(TRAILER, value);
    }

    let body = Body::new(CountingBody::new(Body::new(res_body), fin));
    Response::from_parts(res_parts, body)
}

fn inbound_host(req: &Request<Body>) -> String {
    if let Some(host) = req.headers().get(HOST).and_then(|v| v.to_str().ok()) {
        return host.to_string();
    }
    // HTTP/2 carries the host in :authority instead.
    req.uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_default()
}

fn header_str(req: &Request<Body>, name: HeaderName) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn error_response(mut fin: Finalizer, status: StatusCode, message: &str) -> Response {
    fin.status = status.as_u16();
    let body = Body::new(CountingBody::new(
        Body::from(format!("{message}\n")),
        fin,
    ));
    let mut res = Response::new(body);
    *res.status_mut() = status;
    res.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

/// Per-request bookkeeping, flushed exactly once when the response body
/// completes or is dropped.
struct Finalizer {
    done: bool,
    start: Instant,
    time: DateTime<Utc>,
    method: String,
    path: String,
    protocol: String,
    status: u16,
    remote_ip: String,
    user_agent: String,
    referer: String,
    service: String,
    route: String,
    upstream: String,
    bytes: u64,
    metrics: Arc<MetricsRegistry>,
    logger: AccessLogger,
    policy: AccessLogPolicy,
}

impl Finalizer {
    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        // A body that streamed bytes without an explicit status is a 200.
        let status = if self.status == 0 { 200 } else { self.status };
        let duration = self.start.elapsed();

        self.logger.log(
            &AccessRecord {
                time: self.time,
                method: self.method.clone(),
                path: self.path.clone(),
                protocol: self.protocol.clone(),
                status,
                duration_ms: duration.as_millis() as u64,
                remote_ip: self.remote_ip.clone(),
                user_agent: self.user_agent.clone(),
                referer: self.referer.clone(),
                service: self.service.clone(),
                upstream: self.upstream.clone(),
                bytes_written: self.bytes,
            },
            &self.policy,
        );
        self.metrics
            .inc_request(&self.service, &self.route, &self.method, status);
        self.metrics
            .observe_latency(&self.service, &self.route, duration.as_secs_f64());
    }
}

/// Response-body wrapper that counts forwarded bytes and fires the
/// finalizer at end-of-stream, on a body error, or when the client
/// disconnects and the body is dropped.
struct CountingBody {
    inner: Body,
    fin: Finalizer,
}

impl CountingBody {
    fn new(inner: Body, fin: Finalizer) -> Self {
        Self { inner, fin }
    }
}

impl http_body::Body for CountingBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.fin.bytes += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.fin.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.fin.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CountingBody {
    fn drop(&mut self) {
        self.fin.finish();
    }
}
