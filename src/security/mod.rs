//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → RuleSet::rules_for_path (merged, memoized rules for the path)
//!     → rate_limit.rs (per route + client IP, storage from storage.rs)
//!     → upstream
//!     → pipeline (HTML only: SRI, nonce, CSP finalization)
//!     → headers.rs (literal security headers on the response)
//! ```
//!
//! # Design Decisions
//! - Rules are read through an ArcSwap so reloads never block requests
//! - One RequestContext per response; the nonce never leaves it
//! - Non-HTML and compressed bodies are streamed through untouched

pub mod headers;
pub mod rate_limit;
pub mod storage;

use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, Request, Response, StatusCode},
    middleware::Next,
    response::IntoResponse,
};

use futures_util::stream::{self, StreamExt};

use crate::pipeline::{HtmlPipeline, RenderMode, RequestContext};
use crate::rules::RuleSet;

pub use headers::{apply_security_headers, header_actions, resolved_header_map, HeaderAction};
pub use rate_limit::{Decision, RateLimitStatus, RateLimiter};
pub use storage::{select_storage, Hit, RateLimitStorage};

/// Shared state of the security middleware.
#[derive(Debug)]
pub struct SecurityState {
    pub rules: Arc<ArcSwap<RuleSet>>,
    pub pipeline: Arc<HtmlPipeline>,
    pub limiter: RateLimiter,
    /// HTML bodies larger than this are passed through unprocessed.
    pub max_html_bytes: usize,
}

pub async fn security_middleware(
    State(state): State<Arc<SecurityState>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let resolved = state.rules.load().rules_for_path(request.uri().path());
    if !resolved.rules.is_enabled() {
        return next.run(request).await;
    }

    let mut rate_status = None;
    if let Some(options) = resolved.rules.rate_limiter() {
        let client = client_ip(&request);
        match state.limiter.check(&resolved.route, &client, options) {
            Decision::Limited(status) => return rate_limit::too_many_requests(status, options),
            Decision::Allowed(status) => rate_status = status,
        }
    }

    let mut ctx = RequestContext::new(resolved, RenderMode::Ssr);
    let response = next.run(request).await;

    let mut response = if is_rewritable_html(&response) {
        rewrite_html(response, &mut ctx, &state).await
    } else {
        ctx.finalize_csp();
        response
    };

    apply_security_headers(response.headers_mut(), &ctx);
    if let Some(status) = rate_status {
        status.apply(response.headers_mut());
    }
    response
}

fn client_ip(request: &Request<Body>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_rewritable_html(response: &Response<Body>) -> bool {
    let headers = response.headers();
    let html = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"));
    let encoded = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.eq_ignore_ascii_case("identity"));
    html && !encoded
}

async fn rewrite_html(
    response: Response<Body>,
    ctx: &mut RequestContext,
    state: &SecurityState,
) -> Response<Body> {
    let declared_len = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > state.max_html_bytes) {
        tracing::debug!(route = %ctx.route, "HTML body over size limit, not rewritten");
        ctx.finalize_csp();
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match buffer_html(body, state.max_html_bytes).await {
        Ok(Buffered::Complete(bytes)) => bytes,
        Ok(Buffered::Oversized(body)) => {
            tracing::debug!(route = %ctx.route, "Streamed HTML body over size limit, not rewritten");
            ctx.finalize_csp();
            return Response::from_parts(parts, body);
        }
        Err(e) => {
            tracing::warn!(route = %ctx.route, error = %e, "Failed to read upstream HTML body");
            ctx.finalize_csp();
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    };

    let body = match state.pipeline.run(&bytes, ctx) {
        Cow::Borrowed(_) => Body::from(bytes.clone()),
        Cow::Owned(rewritten) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Body::from(rewritten)
        }
    };
    Response::from_parts(parts, body)
}

enum Buffered {
    Complete(Bytes),
    /// Limit exceeded: the chunks read so far followed by the unread rest.
    Oversized(Body),
}

/// Reads `body` frame by frame until it ends or grows past `limit`.
async fn buffer_html(body: Body, limit: usize) -> Result<Buffered, axum::Error> {
    let mut frames = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0;
    while let Some(chunk) = frames.next().await {
        let chunk = chunk?;
        total += chunk.len();
        chunks.push(chunk);
        if total > limit {
            let read = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            return Ok(Buffered::Oversized(Body::from_stream(read.chain(frames))));
        }
    }
    let bytes = match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.remove(0),
        _ => Bytes::from(chunks.concat()),
    };
    Ok(Buffered::Complete(bytes))
}
