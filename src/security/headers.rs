//! Response header emission.
//!
//! # Responsibilities
//! - Turn the resolved route's header families into literal values
//! - Use the finalized CSP (nonce and hashes substituted), never the raw one
//! - Strip `X-Powered-By` when `hide_powered_by` is on
//!
//! # Design Decisions
//! - A disabled family is simply not emitted; upstream values pass through
//! - A value that is not a legal header is dropped with a warning, the rest
//!   of the response is unaffected

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;

use crate::headers::{to_wire_string, HeaderKey, HeaderOption, Toggle, WireFormat};
use crate::observability::metrics;
use crate::pipeline::RequestContext;

const X_POWERED_BY: &str = "x-powered-by";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderAction {
    Set(HeaderKey, String),
    Remove(&'static str),
}

/// Actions for one response, in emission order.
pub fn header_actions(ctx: &RequestContext) -> Vec<HeaderAction> {
    let mut actions = Vec::new();
    if ctx.rules.hide_powered_by == Some(true) {
        actions.push(HeaderAction::Remove(X_POWERED_BY));
    }

    let Some(headers) = ctx.rules.headers() else {
        return actions;
    };

    for key in HeaderKey::ALL {
        let value = match headers.get(key) {
            Some(Toggle::Enabled(HeaderOption::ContentSecurityPolicy(_))) => {
                ctx.finalized_csp().map(WireFormat::to_wire)
            }
            Some(Toggle::Enabled(option)) => Some(to_wire_string(&option)),
            Some(Toggle::Disabled) | None => None,
        };
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            actions.push(HeaderAction::Set(key, value));
        }
    }
    actions
}

/// Writes the security headers for `ctx` into `target`.
pub fn apply_security_headers(target: &mut HeaderMap, ctx: &RequestContext) {
    for action in header_actions(ctx) {
        match action {
            HeaderAction::Remove(name) => {
                target.remove(name);
            }
            HeaderAction::Set(key, value) => match HeaderValue::from_str(&value) {
                Ok(value) => {
                    target.insert(HeaderName::from_static(lowercase_name(key)), value);
                }
                Err(_) => {
                    tracing::warn!(
                        route = %ctx.route,
                        header = key.header_name(),
                        "Header value contains illegal characters, not emitted"
                    );
                    metrics::record_header_degraded(key.header_name());
                }
            },
        }
    }
}

/// Header name → literal value, as a static host would need to serve them.
pub fn resolved_header_map(ctx: &RequestContext) -> IndexMap<String, String> {
    header_actions(ctx)
        .into_iter()
        .filter_map(|action| match action {
            HeaderAction::Set(key, value) => Some((key.header_name().to_string(), value)),
            HeaderAction::Remove(_) => None,
        })
        .collect()
}

fn lowercase_name(key: HeaderKey) -> &'static str {
    match key {
        HeaderKey::ContentSecurityPolicy => "content-security-policy",
        HeaderKey::CrossOriginEmbedderPolicy => "cross-origin-embedder-policy",
        HeaderKey::CrossOriginOpenerPolicy => "cross-origin-opener-policy",
        HeaderKey::CrossOriginResourcePolicy => "cross-origin-resource-policy",
        HeaderKey::OriginAgentCluster => "origin-agent-cluster",
        HeaderKey::PermissionsPolicy => "permissions-policy",
        HeaderKey::ReferrerPolicy => "referrer-policy",
        HeaderKey::StrictTransportSecurity => "strict-transport-security",
        HeaderKey::XContentTypeOptions => "x-content-type-options",
        HeaderKey::XDnsPrefetchControl => "x-dns-prefetch-control",
        HeaderKey::XDownloadOptions => "x-download-options",
        HeaderKey::XFrameOptions => "x-frame-options",
        HeaderKey::XPermittedCrossDomainPolicies => "x-permitted-cross-domain-policies",
        HeaderKey::XXssProtection => "x-xss-protection",
    }
}
