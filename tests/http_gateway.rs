//! End-to-end L7 forwarding tests against mock upstreams.

mod common;

use std::time::Duration;

use common::{raw_get, raw_request, spawn_static_upstream, spawn_upstream, start_gateway};

#[tokio::test]
async fn routes_by_longest_prefix() {
    let s1 = spawn_static_upstream(200, "from-s1").await;
    let s2 = spawn_static_upstream(200, "from-s2").await;
    let gw = start_gateway(&format!(
        r#"
services:
  - name: s1
    endpoints: [http://{s1}]
  - name: s2
    endpoints: [http://{s2}]
routes:
  - name: api
    match: {{ host: app.example.com, path_prefix: /api }}
    service: s1
  - name: api-v1
    match: {{ host: app.example.com, path_prefix: /api/v1 }}
    service: s2
"#
    ))
    .await;

    let res = raw_get(gw.addr, "app.example.com", "/api/v1/items").await;
    assert_eq!(res.status, 200);
    assert!(res.body.contains("from-s2"));

    let res = raw_get(gw.addr, "app.example.com", "/api/foo").await;
    assert_eq!(res.status, 200);
    assert!(res.body.contains("from-s1"));

    // Not a path-segment match.
    let res = raw_get(gw.addr, "app.example.com", "/apiary").await;
    assert_eq!(res.status, 404);

    gw.shutdown.begin();
}

#[tokio::test]
async fn wildcard_hosts_route_subdomains() {
    let exact = spawn_static_upstream(200, "exact").await;
    let wild = spawn_static_upstream(200, "wild").await;
    let global = spawn_static_upstream(200, "global").await;
    let gw = start_gateway(&format!(
        r#"
services:
  - name: exact
    endpoints: [http://{exact}]
  - name: wild
    endpoints: [http://{wild}]
  - name: global
    endpoints: [http://{global}]
routes:
  - match: {{ host: app.example.com, path_prefix: / }}
    service: exact
  - match: {{ host: "*.example.com", path_prefix: / }}
    service: wild
  - match: {{ path_prefix: / }}
    service: global
"#
    ))
    .await;

    for (host, expected) in [
        ("app.example.com", "exact"),
        ("foo.example.com", "wild"),
        ("deep.foo.example.com", "wild"),
        ("example.com", "global"),
    ] {
        let res = raw_get(gw.addr, host, "/").await;
        assert!(
            res.body.contains(expected),
            "{host}: expected {expected}, got {}",
            res.body
        );
    }

    gw.shutdown.begin();
}

#[tokio::test]
async fn no_route_is_404_without_upstream_contact() {
    let gw = start_gateway(
        r#"
services:
  - name: web
    endpoints: [http://127.0.0.1:9]
routes:
  - match: { host: known.example.com, path_prefix: / }
    service: web
"#,
    )
    .await;

    let res = raw_get(gw.addr, "unknown.example.com", "/").await;
    assert_eq!(res.status, 404);

    gw.shutdown.begin();
}

#[tokio::test]
async fn scrubs_hop_by_hop_and_adds_forwarding_headers() {
    let upstream = spawn_upstream(|req| async move {
        let mut seen = String::new();
        for (k, v) in &req.headers {
            seen.push_str(&format!("{}: {v}\n", k.to_ascii_lowercase()));
        }
        (200, seen)
    })
    .await;

    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints: [http://{upstream}]
routes:
  - match: {{ path_prefix: / }}
    service: web
"#
    ))
    .await;

    let request = "GET /probe HTTP/1.1\r\n\
                   Host: gw.example.com\r\n\
                   Connection: close, FooHop\r\n\
                   FooHop: 1\r\n\
                   Upgrade: websocket\r\n\
                   X-Forwarded-For: 203.0.113.7\r\n\
                   Accept: */*\r\n\r\n";
    let res = raw_request(gw.addr, request).await;
    assert_eq!(res.status, 200);

    let seen = res.body;
    assert!(!seen.contains("foohop"), "hop header leaked: {seen}");
    assert!(!seen.contains("connection"), "connection leaked: {seen}");
    assert!(!seen.contains("upgrade"), "upgrade leaked: {seen}");
    assert!(seen.contains("accept: */*"));
    assert!(seen.contains("x-forwarded-for: 203.0.113.7, 127.0.0.1"));
    assert!(seen.contains("x-forwarded-host: gw.example.com"));
    assert!(seen.contains("x-forwarded-proto: http"));

    gw.shutdown.begin();
}

#[tokio::test]
async fn host_policy_rewrite_wins_over_preserve() {
    let upstream = spawn_upstream(|req| async move {
        (200, req.header("host").unwrap_or("").to_string())
    })
    .await;

    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints: [http://{upstream}]
routes:
  - name: rewritten
    match: {{ host: rewrite.example.com, path_prefix: / }}
    service: web
    options: {{ preserve_host: true, host_rewrite: forced.example.com }}
  - name: preserved
    match: {{ host: preserve.example.com, path_prefix: / }}
    service: web
    options: {{ preserve_host: true }}
  - name: endpoint-host
    match: {{ host: plain.example.com, path_prefix: / }}
    service: web
"#
    ))
    .await;

    let res = raw_get(gw.addr, "rewrite.example.com", "/").await;
    assert_eq!(res.body, "forced.example.com");

    let res = raw_get(gw.addr, "preserve.example.com", "/").await;
    assert_eq!(res.body, "preserve.example.com");

    let res = raw_get(gw.addr, "plain.example.com", "/").await;
    assert_eq!(res.body, upstream.to_string());

    gw.shutdown.begin();
}

#[tokio::test]
async fn upstream_timeout_maps_to_502() {
    let upstream = spawn_upstream(|req| async move {
        if req.path().starts_with("/slow") {
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
        (200, "done".to_string())
    })
    .await;

    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints: [http://{upstream}]
routes:
  - match: {{ path_prefix: / }}
    service: web
timeouts:
  upstream: 150ms
"#
    ))
    .await;

    let res = raw_get(gw.addr, "x", "/slow").await;
    assert_eq!(res.status, 502);

    let res = raw_get(gw.addr, "x", "/fast").await;
    assert_eq!(res.status, 200);
    assert!(res.body.contains("done"));

    gw.shutdown.begin();
}

#[tokio::test]
async fn upstream_5xx_passes_through_then_ejects() {
    let upstream = spawn_static_upstream(500, "boom").await;
    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints: [http://{upstream}]
    passive_health: {{ max_fails: 3, cooldown: 60s }}
routes:
  - match: {{ path_prefix: / }}
    service: web
"#
    ))
    .await;

    // 5xx responses pass through verbatim while the failure streak builds.
    for _ in 0..3 {
        let res = raw_get(gw.addr, "x", "/").await;
        assert_eq!(res.status, 500);
        assert!(res.body.contains("boom"));
    }
    // The only endpoint is now ejected: selection fails before dialing.
    let res = raw_get(gw.addr, "x", "/").await;
    assert_eq!(res.status, 502);

    gw.shutdown.begin();
}

#[tokio::test]
async fn connect_failure_is_502() {
    // Bind-and-drop to find a port with nothing listening.
    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints: [http://{dead_addr}]
routes:
  - match: {{ path_prefix: / }}
    service: web
"#
    ))
    .await;

    let res = raw_get(gw.addr, "x", "/").await;
    assert_eq!(res.status, 502);

    gw.shutdown.begin();
}

#[tokio::test]
async fn rate_limited_route_answers_429() {
    let upstream = spawn_static_upstream(200, "ok").await;
    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints: [http://{upstream}]
routes:
  - name: limited
    match: {{ path_prefix: / }}
    service: web
    rate_limit: {{ requestsPerSecond: 0.5, burst: 1 }}
"#
    ))
    .await;

    let res = raw_get(gw.addr, "x", "/").await;
    assert_eq!(res.status, 200);
    let res = raw_get(gw.addr, "x", "/").await;
    assert_eq!(res.status, 429);

    gw.shutdown.begin();
}

#[tokio::test]
async fn weighted_balancing_spreads_requests() {
    let a = spawn_static_upstream(200, "peer-a").await;
    let b = spawn_static_upstream(200, "peer-b").await;
    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints:
      - url: http://{a}
        weight: 3
      - url: http://{b}
        weight: 1
routes:
  - match: {{ path_prefix: / }}
    service: web
"#
    ))
    .await;

    let mut hits_a = 0;
    let mut hits_b = 0;
    for _ in 0..8 {
        let res = raw_get(gw.addr, "x", "/").await;
        if res.body.contains("peer-a") {
            hits_a += 1;
        } else if res.body.contains("peer-b") {
            hits_b += 1;
        }
    }
    assert_eq!(hits_a, 6);
    assert_eq!(hits_b, 2);

    gw.shutdown.begin();
}

#[tokio::test]
async fn metrics_record_completed_requests() {
    let upstream = spawn_static_upstream(200, "ok").await;
    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints: [http://{upstream}]
routes:
  - name: r-main
    match: {{ path_prefix: / }}
    service: web
"#
    ))
    .await;

    for _ in 0..2 {
        let res = raw_get(gw.addr, "x", "/").await;
        assert_eq!(res.status, 200);
    }

    // Finalizers fire when the response body completes; give the spawned
    // connection tasks a beat to run them.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let text = gw.gateway.metrics.render();
    assert!(text.contains(
        "requests_total{service=\"web\",route=\"r-main\",method=\"GET\",status=\"200\"} 2"
    ));
    assert!(text.contains("upstream_latency_seconds_count{service=\"web\",route=\"r-main\"} 2"));

    gw.shutdown.begin();
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let upstream = spawn_static_upstream(200, "ok").await;
    let gw = start_gateway(&format!(
        r#"
services:
  - name: web
    endpoints: [http://{upstream}]
routes:
  - name: r-exposed
    match: {{ path_prefix: / }}
    service: web
"#
    ))
    .await;

    let res = raw_get(gw.addr, "x", "/").await;
    assert_eq!(res.status, 200);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let tmp = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let metrics_addr = tmp.local_addr().unwrap();
    drop(tmp);
    tokio::spawn(edgegate::observability::metrics::serve(
        gw.gateway.metrics.clone(),
        metrics_addr,
    ));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let body = client
        .get(format!("http://{metrics_addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("# TYPE requests_total counter"));
    assert!(body.contains(
        "requests_total{service=\"web\",route=\"r-exposed\",method=\"GET\",status=\"200\"} 1"
    ));
    assert!(body.contains("# TYPE upstream_latency_seconds histogram"));
    assert!(body.ends_with('\n'));

    gw.shutdown.begin();
}
