//! Rule merge engine.
//!
//! # Data Flow
//! ```text
//! defaults.rs (built-in)
//!     < [security] (global, lives on `/**`)
//!     < route_rules.<pattern>.headers (standard header syntax, legacy)
//!     < route_rules.<pattern>.security (dedicated syntax)
//!     < hooks.rs (runtime `headers` then `route_rules` hooks)
//!     → engine.rs: one merged SecurityRules per pattern
//!
//! Per request:
//!     path → all matching patterns (least → most specific)
//!     → merge.rs fold → Arc<SecurityRules> (memoized)
//! ```
//!
//! # Design Decisions
//! - Rule sets are immutable once built; reloads build a new one
//! - Arrays replace, maps merge key-wise, `false` disables (see merge.rs)

pub mod defaults;
pub mod engine;
pub mod hooks;
pub mod merge;

use serde::{Deserialize, Serialize};

use crate::headers::{SecurityHeaders, Toggle};

pub use engine::{resolve, ResolvedRoute, RuleSet};
pub use hooks::{HeadersPatch, HookHandle, HookRegistry};
pub use merge::Merge;

/// Security configuration of one route pattern. `None` inherits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityRules {
    /// Master switch for the whole security layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Toggle<SecurityHeaders>>,
    /// Attach integrity attributes to bundled assets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sri: Option<bool>,
    /// Nonce-based CSP for server-rendered responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<bool>,
    /// Hash-based CSP for prerendered responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssg: Option<Toggle<SsgOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hide_powered_by: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limiter: Option<Toggle<RateLimiterOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_size_limiter: Option<Toggle<RequestSizeLimiterOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_methods_restricter: Option<Toggle<AllowedMethodsOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_handler: Option<Toggle<CorsOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xss_validator: Option<Toggle<XssValidatorOptions>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<Toggle<BasicAuthOptions>>,
}

impl SecurityRules {
    /// Rules containing only a `headers` layer.
    pub fn from_headers(headers: SecurityHeaders) -> Self {
        Self {
            headers: Some(Toggle::Enabled(headers)),
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Enabled header options, if headers are managed at all.
    pub fn headers(&self) -> Option<&SecurityHeaders> {
        self.headers.as_ref().and_then(Toggle::enabled)
    }

    pub fn ssg(&self) -> Option<&SsgOptions> {
        self.ssg.as_ref().and_then(Toggle::enabled)
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiterOptions> {
        self.rate_limiter.as_ref().and_then(Toggle::enabled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SsgOptions {
    /// Also emit the policy as `<meta http-equiv>` in prerendered pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_scripts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_styles: Option<bool>,
    /// Write static-hosting header rules after prerendering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_to_presets: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimiterOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// Emit `x-ratelimit-*` response headers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throw_error: Option<bool>,
    /// Storage backend. Only read from the global layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverConfig>,
}

/// Storage driver name plus free-form driver options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub name: String,
    pub options: toml::Table,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: "lruCache".to_string(),
            options: toml::Table::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestSizeLimiterOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_request_size_in_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_upload_file_request_in_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throw_error: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AllowedMethodsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throw_error: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_headers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expose_headers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preflight_status_code: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct XssValidatorOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throw_error: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BasicAuthOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Never serialized back out.
    #[serde(skip_serializing)]
    pub pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<String>>,
}
