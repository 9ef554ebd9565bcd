//! Rule resolution and pipeline behaviour, end to end through the library.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use security_proxy::config::{parse_config, ProxyConfig};
use security_proxy::headers::{ContentSecurityPolicy, CspDirective, HeaderKey, SecurityHeaders, Toggle};
use security_proxy::integrity::AssetDigests;
use security_proxy::pipeline::{HtmlPipeline, RenderMode, RequestContext};
use security_proxy::rules::{HeadersPatch, HookRegistry, RuleSet, SecurityRules};
use security_proxy::security::resolved_header_map;

fn rule_set(config: &ProxyConfig, hooks: &HookRegistry) -> RuleSet {
    RuleSet::build(&config.security, &config.route_rules, hooks).unwrap()
}

fn context(rules: &RuleSet, path: &str, mode: RenderMode) -> RequestContext {
    RequestContext::new(rules.rules_for_path(path), mode)
}

/// Headers for a non-HTML response on `path`.
fn headers_for(rules: &RuleSet, path: &str) -> IndexMap<String, String> {
    let mut ctx = context(rules, path, RenderMode::Ssr);
    ctx.finalize_csp();
    resolved_header_map(&ctx)
}

fn pipeline() -> HtmlPipeline {
    HtmlPipeline::new(Arc::new(AssetDigests::new()))
}

#[test]
fn test_route_override_replaces_directive_sources() {
    let config = parse_config(
        r#"
        [security.headers.content_security_policy]
        "script-src" = ["'self'"]

        [route_rules."/admin/**".security.headers.content_security_policy]
        "script-src" = ["'self'", "admin.example.com"]
        "#,
    )
    .unwrap();
    let rules = rule_set(&config, &HookRegistry::new());

    let admin = headers_for(&rules, "/admin/login");
    let csp = &admin["Content-Security-Policy"];
    assert!(csp.contains("script-src 'self' admin.example.com;"), "{csp}");
    assert_eq!(csp.matches("script-src ").count(), 1);

    let home = headers_for(&rules, "/");
    assert!(home["Content-Security-Policy"].contains("script-src 'self';"));
}

#[test]
fn test_legacy_string_equals_structured_policy() {
    let config = parse_config(
        r#"
        [route_rules."/legacy".headers]
        Content-Security-Policy = "script-src 'self' static-value.com"

        [route_rules."/structured".security.headers.content_security_policy]
        "script-src" = ["'self'", "static-value.com"]
        "#,
    )
    .unwrap();
    let rules = rule_set(&config, &HookRegistry::new());

    assert_eq!(headers_for(&rules, "/legacy"), headers_for(&rules, "/structured"));
    assert!(headers_for(&rules, "/legacy")["Content-Security-Policy"]
        .contains("script-src 'self' static-value.com;"));
}

#[test]
fn test_inline_scripts_share_the_response_nonce() {
    let rules = rule_set(&ProxyConfig::default(), &HookRegistry::new());
    let mut ctx = context(&rules, "/", RenderMode::Ssr);

    let html = "<html><head></head><body><script>a()</script><script>b()</script></body></html>";
    let output = String::from_utf8(pipeline().run(html.as_bytes(), &mut ctx).into_owned()).unwrap();

    let nonce = ctx.nonce().unwrap().to_string();
    assert_eq!(output.matches(&format!("<script nonce=\"{nonce}\">")).count(), 2);

    let headers = resolved_header_map(&ctx);
    assert!(headers["Content-Security-Policy"].contains(&format!("'nonce-{nonce}'")));

    let mut other = context(&rules, "/", RenderMode::Ssr);
    pipeline().run(html.as_bytes(), &mut other);
    assert_ne!(other.nonce(), ctx.nonce());
}

#[test]
fn test_inline_style_hash_tracks_content() {
    let config = parse_config("[security.ssg]\nhash_styles = true").unwrap();
    let rules = rule_set(&config, &HookRegistry::new());

    let style_src = |css: &str| {
        let mut ctx = context(&rules, "/", RenderMode::Prerender);
        let html = format!("<html><head><style>{css}</style></head><body></body></html>");
        pipeline().run(html.as_bytes(), &mut ctx);
        resolved_header_map(&ctx)["Content-Security-Policy"].clone()
    };

    let red = style_src("body{color:red}");
    assert!(red.contains(
        "style-src 'self' https: 'unsafe-inline' 'sha256-FcQqt3aNlV7AZnGV4zkQRVeCeJOxbMPnQSx258L803E=';"
    ));

    let blue = style_src("body{color:rex}");
    assert_ne!(red, blue);
    assert!(!blue.contains("FcQqt3aNlV7AZnGV4zkQRVeCeJOxbMPnQSx258L803E="));
}

#[test]
fn test_globally_disabled_header_reenabled_for_one_route() {
    let config = parse_config(
        r#"
        [security.headers]
        x_frame_options = false

        [route_rules."/embed/**".security.headers]
        x_frame_options = "DENY"
        "#,
    )
    .unwrap();
    let rules = rule_set(&config, &HookRegistry::new());

    assert_eq!(headers_for(&rules, "/embed/widget")["X-Frame-Options"], "DENY");
    assert!(!headers_for(&rules, "/").contains_key("X-Frame-Options"));
    assert!(!headers_for(&rules, "/embedded").contains_key("X-Frame-Options"));
}

#[test]
fn test_resolution_is_idempotent() {
    let config = parse_config(
        r#"
        [route_rules."/blog/**".security.headers.permissions_policy]
        camera = ["self"]
        "#,
    )
    .unwrap();
    let rules = rule_set(&config, &HookRegistry::new());
    let first = headers_for(&rules, "/blog/post");
    for _ in 0..3 {
        assert_eq!(headers_for(&rules, "/blog/post"), first);
    }
    let rebuilt = rule_set(&config, &HookRegistry::new());
    assert_eq!(headers_for(&rebuilt, "/blog/post"), first);
}

/// Global policy adding the directives the hooks below leave untouched.
fn hook_config() -> ProxyConfig {
    parse_config(
        r#"
        [security.headers.content_security_policy]
        "default-src" = ["'none'"]
        "connect-src" = ["'self'", "https:"]
        "frame-ancestors" = ["*", "weird-value.com"]
        "frame-src" = ["'self'"]
        "manifest-src" = ["'self'"]
        "media-src" = ["'self'"]
        "worker-src" = ["'self'"]
        "#,
    )
    .unwrap()
}

fn expected_hook_csp(script_src: &str) -> String {
    format!(
        "base-uri 'none'; font-src 'self' https: data:; form-action 'self'; \
         frame-ancestors * weird-value.com; img-src 'self' data:; object-src 'none'; \
         script-src-attr 'none'; style-src 'self' https: 'unsafe-inline'; \
         script-src {script_src}; upgrade-insecure-requests; default-src 'none'; \
         connect-src 'self' https:; frame-src 'self'; manifest-src 'self'; \
         media-src 'self'; worker-src 'self';"
    )
}

#[test]
fn test_headers_hook_sets_static_policy() {
    let hooks = HookRegistry::new();
    hooks.on_headers(|| {
        let mut headers = SecurityHeaders::default();
        headers
            .set_wire(HeaderKey::ContentSecurityPolicy, "script-src 'self' static-value.com")
            .unwrap();
        vec![HeadersPatch::new("/headers-static", headers)]
    });
    let rules = rule_set(&hook_config(), &hooks);

    let headers = headers_for(&rules, "/headers-static");
    assert_eq!(
        headers["Content-Security-Policy"],
        expected_hook_csp("'self' static-value.com")
    );
    assert_eq!(rules.rules_for_path("/headers-static").rules.hide_powered_by, Some(true));
}

#[test]
fn test_route_rules_hook_reads_value_on_every_build() {
    let fetched = Arc::new(Mutex::new("*.dynamic-value.com".to_string()));
    let hooks = HookRegistry::new();
    let source = fetched.clone();
    hooks.on_route_rules(move |routes| {
        let value = source.lock().unwrap().clone();
        let csp = ContentSecurityPolicy::new().with("script-src", CspDirective::sources(["'self'", value.as_str()]));
        let rule = routes.entry("/rules-dynamic".to_string()).or_insert_with(SecurityRules::default);
        rule.headers = Some(Toggle::Enabled(SecurityHeaders {
            content_security_policy: Some(Toggle::Enabled(csp)),
            ..Default::default()
        }));
        rule.hide_powered_by = Some(false);
    });

    let rules = rule_set(&hook_config(), &hooks);
    assert_eq!(
        headers_for(&rules, "/rules-dynamic")["Content-Security-Policy"],
        expected_hook_csp("'self' *.dynamic-value.com")
    );
    assert_eq!(rules.rules_for_path("/rules-dynamic").rules.hide_powered_by, Some(false));

    *fetched.lock().unwrap() = "static-value.com".to_string();
    let rebuilt = rule_set(&hook_config(), &hooks);
    assert_eq!(
        headers_for(&rebuilt, "/rules-dynamic")["Content-Security-Policy"],
        expected_hook_csp("'self' static-value.com")
    );
}

#[test]
fn test_unregistered_hook_no_longer_applies() {
    let hooks = HookRegistry::new();
    let handle = hooks.on_route_rules(|routes| {
        routes.entry("/x".to_string()).or_default().enabled = Some(false);
    });
    assert!(!rule_set(&ProxyConfig::default(), &hooks).rules_for_path("/x").rules.is_enabled());

    assert!(hooks.unregister(handle));
    assert!(rule_set(&ProxyConfig::default(), &hooks).rules_for_path("/x").rules.is_enabled());
}
