//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the proxy handler
//! - Wire up middleware (tracing, request ID, timeout, security)
//! - Bind server to listener
//! - Forward requests to the upstream application
//! - Swap in a rebuilt rule set when the config changes

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::uri::{Authority, PathAndQuery, Scheme},
    http::{header, Request, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{BuildConfig, ProxyConfig};
use crate::error::ConfigurationError;
use crate::integrity::{AssetDigests, SRI_HASHES_FILE};
use crate::observability::metrics;
use crate::pipeline::HtmlPipeline;
use crate::rules::{HookRegistry, RuleSet};
use crate::security::{security_middleware, RateLimiter, SecurityState};

/// Application state injected into the proxy handler.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub upstream: Authority,
}

/// HTTP server fronting the upstream application.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    rules: Arc<ArcSwap<RuleSet>>,
    hooks: Arc<HookRegistry>,
}

impl HttpServer {
    /// Create a server with no runtime hooks.
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigurationError> {
        Self::with_hooks(config, Arc::new(HookRegistry::new()))
    }

    /// Create a server whose rule sets are post-processed by `hooks`.
    ///
    /// Hooks run on every (re)build of the rule set.
    pub fn with_hooks(config: ProxyConfig, hooks: Arc<HookRegistry>) -> Result<Self, ConfigurationError> {
        let rule_set = RuleSet::build(&config.security, &config.route_rules, &hooks)?;
        let limiter = RateLimiter::from_rules(&rule_set.global())?;
        let rules = Arc::new(ArcSwap::from_pointee(rule_set));

        let upstream = Authority::from_str(&config.upstream.address)
            .map_err(|_| ConfigurationError::InvalidUpstream(config.upstream.address.clone()))?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let security = Arc::new(SecurityState {
            rules: rules.clone(),
            pipeline: Arc::new(HtmlPipeline::new(Arc::new(load_assets(&config.build)))),
            limiter,
            max_html_bytes: config.upstream.max_html_bytes,
        });

        tracing::info!(
            upstream = %upstream,
            storage = security.limiter.storage_name(),
            assets = security.pipeline.assets().len(),
            "Security layer initialized"
        );

        let router = Self::build_router(&config, AppState { client, upstream }, security);
        Ok(Self {
            router,
            config,
            rules,
            hooks,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState, security: Arc<SecurityState>) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(middleware::from_fn_with_state(security, security_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Every configuration received on `config_updates` rebuilds the rule
    /// set; a build failure keeps the current one.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let rules = self.rules.clone();
        let hooks = self.hooks.clone();
        tokio::spawn(async move {
            while let Some(new_config) = config_updates.recv().await {
                match RuleSet::build(&new_config.security, &new_config.route_rules, &hooks) {
                    Ok(rule_set) => {
                        rules.store(Arc::new(rule_set));
                        tracing::info!("Security rules reloaded");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected reloaded security rules, keeping current set");
                    }
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// The rule set currently serving requests.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }
}

/// Digests for SRI: hashed from `public_dir`, or read back from a previous build.
fn load_assets(build: &BuildConfig) -> AssetDigests {
    if let Some(dir) = &build.public_dir {
        return AssetDigests::hash_directory(dir, build.sri_algorithm, &build.base_url)
            .unwrap_or_else(|e| {
                tracing::warn!(dir = %dir.display(), error = %e, "Asset hashing failed, SRI disabled");
                AssetDigests::new()
            });
    }

    let recorded = build.security_dir().join(SRI_HASHES_FILE);
    if !recorded.exists() {
        return AssetDigests::new();
    }
    AssetDigests::load(&recorded).unwrap_or_else(|e| {
        tracing::warn!(path = %recorded.display(), error = %e, "Failed to read recorded asset hashes");
        AssetDigests::new()
    })
}

/// Forwards the request to the upstream application.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().to_string();
    let (mut parts, body) = request.into_parts();

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(state.upstream.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(error = %e, "Could not build upstream URI");
            metrics::record_request(&method, 502, start_time);
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };
    // HTML must come back uncompressed to be rewritten.
    parts.headers.remove(header::ACCEPT_ENCODING);

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            metrics::record_request(&method, response.status().as_u16(), start_time);
            let (parts, body) = response.into_parts();
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(error = %e, upstream = %state.upstream, "Upstream error");
            metrics::record_request(&method, 502, start_time);
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}
