//! HTML rewrite pipeline.
//!
//! # Data Flow
//! ```text
//! response body bytes
//!     → tree.rs      parse (span-preserving)
//!     → stages.rs    integrity: SRI attributes, inline hashes (hash mode)
//!     → stages.rs    nonce: one nonce on every script/style carrier (nonce mode)
//!     → stages.rs    finalize_csp: substitute nonce / hashes, optional <meta>
//!     → tree.rs      serialize (untouched bytes copied verbatim)
//!     → RequestContext carries the finalized CSP to the header emitter
//! ```
//!
//! # Design Decisions
//! - Stages only see the `HtmlTree` trait, not the tokenizer
//! - A parse failure skips every stage and returns the original bytes
//! - The pipeline runs exactly once per response

pub mod context;
pub mod stages;
pub mod tree;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

use crate::integrity::{AssetDigests, DigestCache};
use crate::observability::metrics;

pub use context::{CollectedHashes, CspStrategy, RenderMode, RequestContext};
pub use tree::{HtmlDocument, HtmlTree};

/// Shared, request-independent pipeline resources.
#[derive(Debug)]
pub struct HtmlPipeline {
    assets: Arc<AssetDigests>,
    digests: DigestCache,
}

impl HtmlPipeline {
    pub fn new(assets: Arc<AssetDigests>) -> Self {
        Self {
            assets,
            digests: DigestCache::default(),
        }
    }

    pub fn assets(&self) -> &AssetDigests {
        &self.assets
    }

    /// Runs every stage over `body`.
    ///
    /// On a parse error the body is returned unchanged and the context's CSP
    /// is finalized without hashes.
    pub fn run<'a>(&self, body: &'a [u8], ctx: &mut RequestContext) -> Cow<'a, [u8]> {
        let started = Instant::now();

        let mut tree = match HtmlDocument::parse(body) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(
                    route = %ctx.route,
                    error = %e,
                    "HTML pipeline skipped, passing body through"
                );
                metrics::record_pipeline("parse_error", started);
                ctx.finalize_csp();
                return Cow::Borrowed(body);
            }
        };

        stages::integrity(&mut tree, ctx, &self.assets, &self.digests);
        stages::nonce(&mut tree, ctx);
        stages::finalize_csp(&mut tree, ctx);

        let output = tree.serialize();
        metrics::record_pipeline("ok", started);
        tracing::debug!(
            route = %ctx.route,
            script_hashes = ctx.hashes.script.len(),
            style_hashes = ctx.hashes.style.len(),
            nonce = ctx.nonce().is_some(),
            "HTML pipeline finished"
        );
        Cow::Owned(output)
    }
}
