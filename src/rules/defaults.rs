//! Built-in baseline. Lowest layer of every merge.

use crate::headers::{
    ContentSecurityPolicy, CspDirective, PermissionsPolicy, SecurityHeaders,
    StrictTransportSecurity, Toggle, NONCE_PLACEHOLDER,
};
use crate::rules::{
    AllowedMethodsOptions, BasicAuthOptions, CorsOptions, DriverConfig, RateLimiterOptions,
    RequestSizeLimiterOptions, SecurityRules, SsgOptions, XssValidatorOptions,
};

fn scalar(value: &str) -> Option<Toggle<String>> {
    Some(Toggle::Enabled(value.to_string()))
}

pub fn default_content_security_policy() -> ContentSecurityPolicy {
    ContentSecurityPolicy::new()
        .with("base-uri", CspDirective::sources(["'none'"]))
        .with("font-src", CspDirective::sources(["'self'", "https:", "data:"]))
        .with("form-action", CspDirective::sources(["'self'"]))
        .with("frame-ancestors", CspDirective::sources(["'self'"]))
        .with("img-src", CspDirective::sources(["'self'", "data:"]))
        .with("object-src", CspDirective::sources(["'none'"]))
        .with("script-src-attr", CspDirective::sources(["'none'"]))
        .with(
            "style-src",
            CspDirective::sources(["'self'", "https:", "'unsafe-inline'"]),
        )
        .with(
            "script-src",
            CspDirective::sources([
                "'self'",
                "https:",
                "'unsafe-inline'",
                "'strict-dynamic'",
                NONCE_PLACEHOLDER,
            ]),
        )
        .with("upgrade-insecure-requests", CspDirective::Flag(true))
}

pub fn default_security_headers() -> SecurityHeaders {
    SecurityHeaders {
        content_security_policy: Some(Toggle::Enabled(default_content_security_policy())),
        cross_origin_embedder_policy: scalar("require-corp"),
        cross_origin_opener_policy: scalar("same-origin"),
        cross_origin_resource_policy: scalar("same-origin"),
        origin_agent_cluster: scalar("?1"),
        permissions_policy: Some(Toggle::Enabled(
            PermissionsPolicy::new()
                .with("camera", Vec::<String>::new())
                .with("display-capture", Vec::<String>::new())
                .with("fullscreen", Vec::<String>::new())
                .with("geolocation", Vec::<String>::new())
                .with("microphone", Vec::<String>::new()),
        )),
        referrer_policy: scalar("no-referrer"),
        strict_transport_security: Some(Toggle::Enabled(StrictTransportSecurity::default())),
        x_content_type_options: scalar("nosniff"),
        x_dns_prefetch_control: scalar("off"),
        x_download_options: scalar("noopen"),
        x_frame_options: scalar("SAMEORIGIN"),
        x_permitted_cross_domain_policies: scalar("none"),
        x_xss_protection: scalar("0"),
    }
}

/// Every option explicitly set, so merged results never depend on `unwrap_or`.
pub fn default_security_rules() -> SecurityRules {
    SecurityRules {
        enabled: Some(true),
        headers: Some(Toggle::Enabled(default_security_headers())),
        sri: Some(true),
        nonce: Some(true),
        ssg: Some(Toggle::Enabled(SsgOptions {
            meta: Some(true),
            hash_scripts: Some(true),
            hash_styles: Some(false),
            export_to_presets: Some(true),
        })),
        hide_powered_by: Some(true),
        rate_limiter: Some(Toggle::Enabled(RateLimiterOptions {
            tokens_per_interval: Some(150),
            interval_ms: Some(300_000),
            headers: Some(false),
            whitelist: None,
            throw_error: Some(true),
            driver: Some(DriverConfig::default()),
        })),
        request_size_limiter: Some(Toggle::Enabled(RequestSizeLimiterOptions {
            max_request_size_in_bytes: Some(2_000_000),
            max_upload_file_request_in_bytes: Some(8_000_000),
            throw_error: Some(true),
        })),
        allowed_methods_restricter: Some(Toggle::Enabled(AllowedMethodsOptions {
            methods: Some(vec!["*".to_string()]),
            throw_error: Some(true),
        })),
        cors_handler: Some(Toggle::Enabled(CorsOptions {
            origin: None,
            methods: Some(
                ["GET", "HEAD", "PUT", "PATCH", "POST", "DELETE"]
                    .map(String::from)
                    .to_vec(),
            ),
            allow_headers: None,
            expose_headers: None,
            credentials: None,
            max_age: None,
            preflight_status_code: Some(204),
        })),
        xss_validator: Some(Toggle::Enabled(XssValidatorOptions {
            methods: Some(vec!["GET".to_string(), "POST".to_string()]),
            throw_error: Some(true),
        })),
        basic_auth: Some(Toggle::<BasicAuthOptions>::Disabled),
    }
}
