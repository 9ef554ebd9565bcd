//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Build the rule set once so bad patterns, legacy headers and storage
//!   drivers are caught before the config is accepted
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::error::ConfigurationError;
use crate::rules::{HookRegistry, RuleSet};
use crate::security::RateLimiter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: `{value}` is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.address: `{0}` is not a valid host:port")]
    InvalidUpstream(String),

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error(transparent)]
    Rules(#[from] ConfigurationError),
}

/// Validates `config`, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if SocketAddr::from_str(&config.listener.bind_address).is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && SocketAddr::from_str(&config.observability.metrics_address).is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    let upstream_ok = Authority::from_str(&config.upstream.address)
        .map(|authority| authority.port_u16().is_some())
        .unwrap_or(false);
    if !upstream_ok {
        errors.push(ValidationError::InvalidUpstream(config.upstream.address.clone()));
    }

    if config.upstream.max_html_bytes == 0 {
        errors.push(ValidationError::ZeroValue("upstream.max_html_bytes"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.request_secs"));
    }
    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroValue("timeouts.connect_secs"));
    }

    match RuleSet::build(&config.security, &config.route_rules, &HookRegistry::new()) {
        Ok(rules) => {
            if let Err(e) = RateLimiter::from_rules(&rules.global()) {
                errors.push(e.into());
            }
        }
        Err(e) => errors.push(e.into()),
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ProxyConfig {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let config = parse(
            r#"
            [listener]
            bind_address = "not-an-address"
            [upstream]
            address = "localhost"
            [timeouts]
            request_secs = 0
            [security.rate_limiter.driver]
            name = "redis"
            "#,
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::ZeroValue("timeouts.request_secs")));
        assert!(errors.contains(&ValidationError::Rules(ConfigurationError::UnknownDriver(
            "redis".into()
        ))));
    }

    #[test]
    fn test_bad_route_pattern_is_reported() {
        let config = parse("[route_rules.\"/a/**/b\".security]\nsri = false");
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::Rules(ConfigurationError::InvalidPattern { .. })]
        ));
    }

    #[test]
    fn test_hostname_upstream_is_accepted() {
        let config = parse("[upstream]\naddress = \"app.internal:3000\"");
        assert_eq!(validate_config(&config), Ok(()));
    }
}
