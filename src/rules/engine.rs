//! Rule set construction and per-path resolution.

use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;

use crate::config::RouteRule;
use crate::error::ConfigurationError;
use crate::headers::{HeaderKey, SecurityHeaders};
use crate::routing::RouteTable;
use crate::rules::defaults::default_security_rules;
use crate::rules::hooks::HookRegistry;
use crate::rules::merge::{merge_layers, Merge};
use crate::rules::SecurityRules;

/// Pattern that carries the defaults and the global configuration.
pub const ROOT_PATTERN: &str = "/**";

/// Folds override layers, lowest precedence first, into one rule set.
pub fn resolve(route_pattern: &str, layers: &[SecurityRules]) -> SecurityRules {
    let merged: SecurityRules = merge_layers(layers);
    tracing::debug!(
        route = route_pattern,
        layers = layers.len(),
        enabled = merged.is_enabled(),
        "Resolved route security rules"
    );
    merged
}

/// Rules effective for one request path.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// Most specific matching pattern.
    pub route: String,
    pub rules: Arc<SecurityRules>,
}

/// Immutable merged configuration, one entry per route pattern.
#[derive(Debug)]
pub struct RuleSet {
    routes: IndexMap<String, Arc<SecurityRules>>,
    table: RouteTable,
    /// Memo of merged rules, keyed by the matched pattern indices.
    resolved: DashMap<Vec<usize>, Arc<SecurityRules>>,
    fallback: Arc<SecurityRules>,
}

impl RuleSet {
    /// Builds the rule set from configuration layers and runtime hooks.
    pub fn build(
        global: &SecurityRules,
        route_rules: &IndexMap<String, RouteRule>,
        hooks: &HookRegistry,
    ) -> Result<Self, ConfigurationError> {
        let mut routes: IndexMap<String, SecurityRules> = IndexMap::new();

        let mut root_layers = vec![default_security_rules(), global.clone()];
        if let Some(rule) = route_rules.get(ROOT_PATTERN) {
            root_layers.extend(route_layers(ROOT_PATTERN, rule)?);
        }
        routes.insert(ROOT_PATTERN.to_string(), resolve(ROOT_PATTERN, &root_layers));

        for (pattern, rule) in route_rules {
            if pattern == ROOT_PATTERN {
                continue;
            }
            let layers = route_layers(pattern, rule)?;
            if layers.is_empty() {
                continue;
            }
            routes.insert(pattern.clone(), resolve(pattern, &layers));
        }

        for patch in hooks.collect_header_patches() {
            routes
                .entry(patch.route)
                .or_default()
                .merge_from(&SecurityRules::from_headers(patch.headers));
        }
        hooks.rewrite_route_rules(&mut routes);

        let table = RouteTable::compile(routes.keys().map(String::as_str))?;

        for (route, rules) in &routes {
            warn_static_nonces(route, rules);
        }

        let fallback = routes
            .get(ROOT_PATTERN)
            .cloned()
            .unwrap_or_else(default_security_rules);

        tracing::info!(routes = routes.len(), "Security rule set built");

        Ok(Self {
            routes: routes
                .into_iter()
                .map(|(route, rules)| (route, Arc::new(rules)))
                .collect(),
            table,
            resolved: DashMap::new(),
            fallback: Arc::new(fallback),
        })
    }

    /// Merges every pattern matching `path`, least specific first.
    pub fn rules_for_path(&self, path: &str) -> ResolvedRoute {
        let matched = self.table.match_all(path);
        let Some(&most_specific) = matched.last() else {
            return ResolvedRoute {
                route: ROOT_PATTERN.to_string(),
                rules: self.fallback.clone(),
            };
        };

        let route = self
            .table
            .pattern(most_specific)
            .map(|pattern| pattern.as_str().to_string())
            .unwrap_or_else(|| ROOT_PATTERN.to_string());

        if let Some(rules) = self.resolved.get(&matched) {
            return ResolvedRoute {
                route,
                rules: rules.clone(),
            };
        }

        let rules = if matched.len() == 1 {
            self.routes[most_specific].clone()
        } else {
            let merged: SecurityRules =
                merge_layers(matched.iter().map(|&i| self.routes[i].as_ref()));
            Arc::new(merged)
        };
        self.resolved.insert(matched, rules.clone());

        ResolvedRoute { route, rules }
    }

    /// Rules of the global pattern.
    pub fn global(&self) -> Arc<SecurityRules> {
        self.routes
            .get(ROOT_PATTERN)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    /// Merged rules per pattern, in configuration order.
    pub fn routes(&self) -> impl Iterator<Item = (&str, &SecurityRules)> {
        self.routes
            .iter()
            .map(|(route, rules)| (route.as_str(), rules.as_ref()))
    }
}

/// Legacy standard-header layer followed by the dedicated security layer.
fn route_layers(pattern: &str, rule: &RouteRule) -> Result<Vec<SecurityRules>, ConfigurationError> {
    let mut layers = Vec::with_capacity(2);
    if let Some(headers) = legacy_headers(pattern, &rule.headers)? {
        layers.push(SecurityRules::from_headers(headers));
    }
    if let Some(security) = &rule.security {
        layers.push(security.clone());
    }
    Ok(layers)
}

/// Picks the security families out of plain `Header-Name = "value"` entries.
///
/// Values go through the same deserializer as `[security.headers]`, so a
/// legacy string yields exactly what the structured form would.
fn legacy_headers(
    pattern: &str,
    headers: &IndexMap<String, String>,
) -> Result<Option<SecurityHeaders>, ConfigurationError> {
    let table: toml::Table = headers
        .iter()
        .filter_map(|(name, value)| {
            HeaderKey::from_name(name)
                .map(|key| (key.option_name().to_string(), toml::Value::String(value.clone())))
        })
        .collect();

    if table.is_empty() {
        return Ok(None);
    }

    toml::Value::Table(table)
        .try_into::<SecurityHeaders>()
        .map(Some)
        .map_err(|e| ConfigurationError::InvalidRule {
            route: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn warn_static_nonces(route: &str, rules: &SecurityRules) {
    let Some(csp) = rules
        .headers()
        .and_then(|headers| headers.content_security_policy.as_ref())
        .and_then(|csp| csp.enabled())
    else {
        return;
    };
    for (directive, source) in csp.static_nonces() {
        tracing::warn!(
            route,
            directive,
            source,
            "Hard-coded nonce in Content-Security-Policy will be removed"
        );
    }
}
