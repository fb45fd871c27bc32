//! Header hygiene and URL helpers shared by the forwarding path.

use http::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE,
    TRAILER, TRANSFER_ENCODING, UPGRADE,
};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");

/// Remove hop-by-hop headers: first every header named in a `Connection`
/// value, then the canonical set. `TE: trailers` survives so gRPC status
/// trailers keep flowing over HTTP/2.
pub fn scrub_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    let te_is_trailers = headers
        .get(TE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "trailers");

    headers.remove(CONNECTION);
    headers.remove(PROXY_CONNECTION);
    headers.remove(KEEP_ALIVE);
    headers.remove(PROXY_AUTHENTICATE);
    headers.remove(PROXY_AUTHORIZATION);
    if !te_is_trailers {
        headers.remove(TE);
    }
    headers.remove(TRAILER);
    headers.remove(TRANSFER_ENCODING);
    headers.remove(UPGRADE);
}

/// Append the client IP to `X-Forwarded-For`, comma-separated after any
/// existing value.
pub fn append_forwarded_for(headers: &mut HeaderMap, client_ip: &str) {
    if client_ip.is_empty() {
        return;
    }
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {client_ip}"),
        _ => client_ip.to_string(),
    };
    if let Ok(v) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, v);
    }
}

/// `X-Forwarded-Host` carries the Host the client sent us.
pub fn set_forwarded_host(headers: &mut HeaderMap, host: &str) {
    if let Ok(v) = HeaderValue::from_str(host) {
        headers.insert(X_FORWARDED_HOST, v);
    }
}

/// `X-Forwarded-Proto` reflects whether this gateway terminated TLS.
pub fn set_forwarded_proto(headers: &mut HeaderMap, tls_terminated: bool) {
    let v = if tls_terminated { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(v));
}

/// Join an endpoint base path and a request path with exactly one slash at
/// the boundary.
pub fn join_path(base: &str, request: &str) -> String {
    let base_slash = base.ends_with('/');
    let request_slash = request.starts_with('/');
    match (base_slash, request_slash) {
        (true, true) => format!("{base}{}", &request[1..]),
        (false, false) => format!("{base}/{request}"),
        _ => format!("{base}{request}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn scrub_removes_connection_named_headers() {
        let mut h = headers(&[
            ("connection", "keep-alive, FooHop"),
            ("foohop", "1"),
            ("upgrade", "websocket"),
            ("accept", "*/*"),
        ]);
        scrub_hop_by_hop(&mut h);
        assert!(h.get("connection").is_none());
        assert!(h.get("foohop").is_none());
        assert!(h.get("upgrade").is_none());
        assert_eq!(h.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn scrub_removes_canonical_set() {
        let mut h = headers(&[
            ("proxy-connection", "keep-alive"),
            ("keep-alive", "timeout=5"),
            ("proxy-authenticate", "Basic"),
            ("proxy-authorization", "Basic Zm9v"),
            ("te", "gzip"),
            ("trailer", "X-Checksum"),
            ("transfer-encoding", "chunked"),
        ]);
        scrub_hop_by_hop(&mut h);
        assert!(h.is_empty());
    }

    #[test]
    fn scrub_preserves_te_trailers() {
        let mut h = headers(&[("te", "trailers")]);
        scrub_hop_by_hop(&mut h);
        assert_eq!(h.get("te").unwrap(), "trailers");

        let mut h = headers(&[("te", "trailers, deflate")]);
        scrub_hop_by_hop(&mut h);
        assert!(h.get("te").is_none());
    }

    #[test]
    fn scrub_is_idempotent() {
        let mut h = headers(&[("connection", "x-drop"), ("x-drop", "1"), ("accept", "*/*")]);
        scrub_hop_by_hop(&mut h);
        let once: Vec<_> = h.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        scrub_hop_by_hop(&mut h);
        let twice: Vec<_> = h.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        assert_eq!(once, twice);
    }

    #[test]
    fn forwarded_for_appends() {
        let mut h = HeaderMap::new();
        append_forwarded_for(&mut h, "10.0.0.9");
        assert_eq!(h.get("x-forwarded-for").unwrap(), "10.0.0.9");
        append_forwarded_for(&mut h, "10.0.0.10");
        assert_eq!(h.get("x-forwarded-for").unwrap(), "10.0.0.9, 10.0.0.10");
    }

    #[test]
    fn forwarded_proto_reflects_tls() {
        let mut h = HeaderMap::new();
        set_forwarded_proto(&mut h, false);
        assert_eq!(h.get("x-forwarded-proto").unwrap(), "http");
        set_forwarded_proto(&mut h, true);
        assert_eq!(h.get("x-forwarded-proto").unwrap(), "https");
    }

    #[test]
    fn join_path_collapses_one_slash() {
        assert_eq!(join_path("", "/api"), "/api");
        assert_eq!(join_path("/", "/api"), "/api");
        assert_eq!(join_path("/base", "/api"), "/base/api");
        assert_eq!(join_path("/base/", "/api"), "/base/api");
        assert_eq!(join_path("/base", "api"), "/base/api");
    }
}
