//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from the TOML file.
//! Security rules reuse the types of the rules module directly.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::integrity::HashAlgorithm;
use crate::rules::SecurityRules;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Application server the proxy fronts.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Global security rules. Applied to `/**` on top of the built-in defaults.
    pub security: SecurityRules,

    /// Per-pattern overrides, in configuration order.
    pub route_rules: IndexMap<String, RouteRule>,

    /// Static asset and prerender output settings.
    pub build: BuildConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream authority (e.g., "127.0.0.1:3000").
    pub address: String,

    /// Largest HTML body the pipeline will buffer and rewrite.
    pub max_html_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
            max_html_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Overrides for one route pattern.
///
/// `headers` holds plain response headers in their standard names; only the
/// security families among them are picked up. `security` uses the same
/// shape as the global `[security]` table and wins over `headers`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouteRule {
    pub headers: IndexMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<SecurityRules>,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout to the upstream in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Static hosting target for exported header rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportPreset {
    Netlify,
    Vercel,
}

/// Build-time settings: asset hashing and prerender output.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory of bundled assets to hash for SRI.
    pub public_dir: Option<PathBuf>,

    /// Where prerender records, hashes and exported presets are written.
    pub output_dir: PathBuf,

    /// URL prefix the public directory is served under.
    pub base_url: String,

    /// Algorithm for asset integrity digests.
    pub sri_algorithm: HashAlgorithm,

    /// Export header rules for this host after prerendering.
    pub preset: Option<ExportPreset>,
}

impl BuildConfig {
    /// Directory holding prerender records, `headers.json` and asset hashes.
    pub fn security_dir(&self) -> PathBuf {
        self.output_dir.join("security")
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            public_dir: None,
            output_dir: PathBuf::from(".output"),
            base_url: "/".to_string(),
            sri_algorithm: HashAlgorithm::Sha384,
            preset: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.upstream.address, "127.0.0.1:3000");
        assert_eq!(config.build.sri_algorithm, HashAlgorithm::Sha384);
        assert!(config.route_rules.is_empty());
    }

    #[test]
    fn test_route_rules_keep_configuration_order() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [route_rules."/b/**".security]
            sri = false
            [route_rules."/a/**".headers]
            X-Frame-Options = "DENY"
            [build]
            preset = "netlify"
            "#,
        )
        .unwrap();
        let patterns: Vec<&str> = config.route_rules.keys().map(String::as_str).collect();
        assert_eq!(patterns, ["/b/**", "/a/**"]);
        assert_eq!(config.build.preset, Some(ExportPreset::Netlify));
    }

    #[test]
    fn test_unknown_route_rule_key_is_rejected() {
        let result: Result<ProxyConfig, _> =
            toml::from_str("[route_rules.\"/x\"]\nheaderz = {}");
        assert!(result.is_err());
    }
}
