//! Security header proxy library.
//!
//! Resolves per-route security policy (headers, CSP nonces and hashes,
//! subresource integrity, rate limits) and applies it to proxied responses
//! and to prerendered static pages.

pub mod config;
pub mod error;
pub mod headers;
pub mod http;
pub mod integrity;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod prerender;
pub mod routing;
pub mod rules;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use rules::{HookRegistry, RuleSet, SecurityRules};
