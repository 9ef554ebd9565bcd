//! End-to-end tests: reqwest client → proxy → mock upstream.

use std::net::SocketAddr;
use std::time::Duration;

use security_proxy::config::ProxyConfig;
use security_proxy::rules::HookRegistry;

mod common;
use common::{config, start_mock_upstream, start_proxy, Framing, MockResponse};

const PAGE: &str = "<html><head><title>t</title></head><body><script>boot()</script></body></html>";

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

fn header<'a>(res: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    res.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_html_response_gets_headers_and_matching_nonce() {
    let upstream = start_mock_upstream(|_| MockResponse::html(PAGE)).await;
    let proxy = start_proxy(ProxyConfig::default(), upstream, HookRegistry::new()).await;

    let res = client().get(proxy.url("/")).send().await.expect("Proxy unreachable");
    assert_eq!(res.status(), 200);
    assert_eq!(header(&res, "x-frame-options"), Some("SAMEORIGIN"));
    assert_eq!(header(&res, "x-content-type-options"), Some("nosniff"));
    assert!(header(&res, "x-powered-by").is_none());

    let csp = header(&res, "content-security-policy").unwrap().to_string();
    let body = res.text().await.unwrap();

    let nonce = body
        .split("nonce=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .expect("script carries a nonce");
    assert!(csp.contains(&format!("'nonce-{nonce}'")), "{csp}");
    assert!(!csp.contains("{{nonce}}"));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_each_response_gets_a_fresh_nonce() {
    let upstream = start_mock_upstream(|_| MockResponse::html(PAGE)).await;
    let proxy = start_proxy(ProxyConfig::default(), upstream, HookRegistry::new()).await;

    let client = client();
    let first = client.get(proxy.url("/")).send().await.unwrap();
    let second = client.get(proxy.url("/")).send().await.unwrap();
    assert_ne!(
        header(&first, "content-security-policy"),
        header(&second, "content-security-policy")
    );

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_non_html_body_passes_through_untouched() {
    let upstream = start_mock_upstream(|_| MockResponse::json(r#"{"script":"<script>x</script>"}"#)).await;
    let proxy = start_proxy(ProxyConfig::default(), upstream, HookRegistry::new()).await;

    let res = client().get(proxy.url("/api/data")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(header(&res, "x-frame-options"), Some("SAMEORIGIN"));
    let csp = header(&res, "content-security-policy").unwrap().to_string();
    assert!(!csp.contains("nonce"));
    assert_eq!(res.text().await.unwrap(), r#"{"script":"<script>x</script>"}"#);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_route_rules_hook_can_keep_powered_by() {
    let upstream = start_mock_upstream(|_| MockResponse::html(PAGE)).await;
    let hooks = HookRegistry::new();
    hooks.on_route_rules(|routes| {
        routes.entry("/legacy/**".to_string()).or_default().hide_powered_by = Some(false);
    });
    let proxy = start_proxy(ProxyConfig::default(), upstream, hooks).await;

    let client = client();
    let kept = client.get(proxy.url("/legacy/page")).send().await.unwrap();
    assert_eq!(header(&kept, "x-powered-by"), Some("Nuxt"));

    let stripped = client.get(proxy.url("/other")).send().await.unwrap();
    assert!(header(&stripped, "x-powered-by").is_none());

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_disabled_route_is_proxied_verbatim() {
    let upstream = start_mock_upstream(|_| MockResponse::html(PAGE)).await;
    let cfg = config(
        r#"
        [route_rules."/raw/**".security]
        enabled = false
        "#,
    );
    let proxy = start_proxy(cfg, upstream, HookRegistry::new()).await;

    let res = client().get(proxy.url("/raw/page")).send().await.unwrap();
    assert!(header(&res, "content-security-policy").is_none());
    assert_eq!(header(&res, "x-powered-by"), Some("Nuxt"));
    assert_eq!(res.text().await.unwrap(), PAGE);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_rate_limit_rejects_after_budget() {
    let upstream = start_mock_upstream(|_| MockResponse::json("{}")).await;
    let cfg = config(
        r#"
        [security.rate_limiter]
        tokens_per_interval = 2
        interval_ms = 60000
        headers = true
        driver = { name = "memory" }
        "#,
    );
    let proxy = start_proxy(cfg, upstream, HookRegistry::new()).await;
    let client = client();

    let first = client.get(proxy.url("/api")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(header(&first, "x-ratelimit-limit"), Some("2"));
    assert_eq!(header(&first, "x-ratelimit-remaining"), Some("1"));
    assert_eq!(client.get(proxy.url("/api")).send().await.unwrap().status(), 200);

    let limited = client.get(proxy.url("/api")).send().await.unwrap();
    assert_eq!(limited.status(), 429);
    assert!(header(&limited, "retry-after").is_some());
    assert_eq!(
        limited.text().await.unwrap(),
        r#"{"statusCode":429,"statusMessage":"Too Many Requests"}"#
    );

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_reload_swaps_rules_without_restart() {
    let upstream = start_mock_upstream(|_| MockResponse::json("{}")).await;
    let proxy = start_proxy(ProxyConfig::default(), upstream, HookRegistry::new()).await;
    let client = client();

    let before = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(header(&before, "x-frame-options"), Some("SAMEORIGIN"));

    let mut updated = config("[security.headers]\nx_frame_options = \"DENY\"");
    updated.upstream.address = upstream.to_string();
    proxy.config_updates.send(updated).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let after = client.get(proxy.url("/")).send().await.unwrap();
    assert_eq!(header(&after, "x-frame-options"), Some("DENY"));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_unreachable_upstream_returns_bad_gateway() {
    let dead: SocketAddr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let proxy = start_proxy(ProxyConfig::default(), dead, HookRegistry::new()).await;

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);

    proxy.shutdown.trigger();
}

fn large_page() -> String {
    format!(
        "<html><head></head><body><script>boot()</script><p>{}</p></body></html>",
        "x".repeat(2048)
    )
}

#[tokio::test]
async fn test_chunked_html_over_limit_streams_through() {
    let page = large_page();
    let body = page.clone();
    let upstream = start_mock_upstream(move |_| MockResponse::html(body.clone()).framed(Framing::Chunked)).await;
    let mut cfg = ProxyConfig::default();
    cfg.upstream.max_html_bytes = 1024;
    let proxy = start_proxy(cfg, upstream, HookRegistry::new()).await;

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let csp = header(&res, "content-security-policy").unwrap().to_string();
    assert!(!csp.contains("{{nonce}}"));
    assert!(!csp.contains("'nonce-"), "{csp}");
    assert_eq!(res.text().await.unwrap(), page);

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_chunked_html_under_limit_is_rewritten() {
    let body = large_page();
    let upstream = start_mock_upstream(move |_| MockResponse::html(body.clone()).framed(Framing::Chunked)).await;
    let proxy = start_proxy(ProxyConfig::default(), upstream, HookRegistry::new()).await;

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.text().await.unwrap().contains("<script nonce=\""));

    proxy.shutdown.trigger();
}

#[tokio::test]
async fn test_upstream_body_cut_short_returns_bad_gateway() {
    let body = large_page();
    let upstream =
        start_mock_upstream(move |_| MockResponse::html(body.clone()).framed(Framing::ChunkedTruncated)).await;
    let proxy = start_proxy(ProxyConfig::default(), upstream, HookRegistry::new()).await;

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);

    proxy.shutdown.trigger();
}
