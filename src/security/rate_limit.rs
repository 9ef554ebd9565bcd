//! Per-route, per-client rate limiting over a pluggable storage backend.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
};

use crate::observability::metrics;
use crate::rules::{DriverConfig, RateLimiterOptions, SecurityRules};
use crate::security::storage::{select_storage, RateLimitStorage};
use crate::error::ConfigurationError;

const DEFAULT_TOKENS_PER_INTERVAL: u64 = 150;
const DEFAULT_INTERVAL_MS: u64 = 300_000;

/// Counters reported back to the client when `headers` is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset_secs: u64,
}

impl RateLimitStatus {
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert("x-ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("x-ratelimit-reset", HeaderValue::from(self.reset_secs));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through; attach the status headers if present.
    Allowed(Option<RateLimitStatus>),
    /// Over the limit.
    Limited(RateLimitStatus),
}

#[derive(Debug, Clone)]
pub struct RateLimiter {
    storage: Arc<dyn RateLimitStorage>,
}

impl RateLimiter {
    pub fn new(storage: Arc<dyn RateLimitStorage>) -> Self {
        Self { storage }
    }

    /// Selects storage from the global layer's driver setting.
    pub fn from_rules(global: &SecurityRules) -> Result<Self, ConfigurationError> {
        let default_driver = DriverConfig::default();
        let driver = global
            .rate_limiter()
            .and_then(|options| options.driver.as_ref())
            .unwrap_or(&default_driver);
        Ok(Self::new(select_storage(driver)?))
    }

    pub fn storage_name(&self) -> &'static str {
        self.storage.name()
    }

    /// Counts one request from `client` against `route`'s bucket.
    ///
    /// Storage failures let the request through.
    pub fn check(&self, route: &str, client: &str, options: &RateLimiterOptions) -> Decision {
        if options
            .whitelist
            .as_ref()
            .is_some_and(|list| list.iter().any(|ip| ip == client))
        {
            return Decision::Allowed(None);
        }

        let limit = options.tokens_per_interval.unwrap_or(DEFAULT_TOKENS_PER_INTERVAL);
        let interval = Duration::from_millis(options.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS));
        let key = format!("{route}:{client}");

        let hit = match self.storage.increment(&key, interval) {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(
                    driver = self.storage.name(),
                    route = %route,
                    error = %e,
                    "Rate limiter storage unavailable, allowing request"
                );
                metrics::record_storage_error(self.storage.name());
                return Decision::Allowed(None);
            }
        };

        let status = RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(hit.count),
            reset_secs: hit.resets_in.as_secs(),
        };

        if hit.count > limit {
            tracing::warn!(client = %client, route = %route, "Rate limit exceeded");
            metrics::record_rate_limited(route);
            return Decision::Limited(status);
        }

        Decision::Allowed(options.headers.unwrap_or(false).then_some(status))
    }
}

/// 429 response. `throw_error = false` returns an empty body instead of the
/// JSON error document.
pub fn too_many_requests(status: RateLimitStatus, options: &RateLimiterOptions) -> Response {
    let body = if options.throw_error.unwrap_or(true) {
        Body::from(r#"{"statusCode":429,"statusMessage":"Too Many Requests"}"#)
    } else {
        Body::empty()
    };

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    if options.throw_error.unwrap_or(true) {
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(status.reset_secs));
    if options.headers.unwrap_or(false) {
        status.apply(response.headers_mut());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::security::storage::{Hit, MemoryStorage};

    fn options(tokens: u64) -> RateLimiterOptions {
        RateLimiterOptions {
            tokens_per_interval: Some(tokens),
            interval_ms: Some(60_000),
            headers: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn test_limit_applies_per_route_and_client() {
        let limiter = RateLimiter::new(Arc::new(MemoryStorage::default()));
        let opts = options(2);

        assert!(matches!(limiter.check("/api/**", "1.1.1.1", &opts), Decision::Allowed(Some(s)) if s.remaining == 1));
        assert!(matches!(limiter.check("/api/**", "1.1.1.1", &opts), Decision::Allowed(Some(s)) if s.remaining == 0));
        assert!(matches!(limiter.check("/api/**", "1.1.1.1", &opts), Decision::Limited(_)));

        assert!(matches!(limiter.check("/api/**", "2.2.2.2", &opts), Decision::Allowed(_)));
        assert!(matches!(limiter.check("/**", "1.1.1.1", &opts), Decision::Allowed(_)));
    }

    #[test]
    fn test_whitelisted_client_is_never_counted() {
        let limiter = RateLimiter::new(Arc::new(MemoryStorage::default()));
        let mut opts = options(0);
        opts.whitelist = Some(vec!["127.0.0.1".into()]);
        for _ in 0..5 {
            assert_eq!(limiter.check("/**", "127.0.0.1", &opts), Decision::Allowed(None));
        }
    }

    #[derive(Debug)]
    struct BrokenStorage;

    impl RateLimitStorage for BrokenStorage {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn increment(&self, _key: &str, _ttl: Duration) -> Result<Hit, StorageError> {
            Err(StorageError::Unavailable("down".into()))
        }
    }

    #[test]
    fn test_storage_failure_allows_request() {
        let limiter = RateLimiter::new(Arc::new(BrokenStorage));
        assert_eq!(limiter.check("/**", "1.1.1.1", &options(0)), Decision::Allowed(None));
    }

    #[test]
    fn test_too_many_requests_response() {
        let status = RateLimitStatus { limit: 2, remaining: 0, reset_secs: 30 };
        let response = too_many_requests(status, &options(2));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["retry-after"], "30");
    }

    #[test]
    fn test_storage_follows_global_driver() {
        let rules: SecurityRules =
            toml::from_str("[rate_limiter.driver]\nname = \"memory\"").unwrap();
        assert_eq!(RateLimiter::from_rules(&rules).unwrap().storage_name(), "memory");
        assert_eq!(
            RateLimiter::from_rules(&SecurityRules::default()).unwrap().storage_name(),
            "lruCache"
        );
    }
}
