//! Per-request security state.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;

use crate::headers::ContentSecurityPolicy;
use crate::observability::metrics;
use crate::rules::{ResolvedRoute, SecurityRules};

/// Bytes of randomness per nonce.
const NONCE_BYTES: usize = 16;

/// How the response is being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Live request through the proxy.
    Ssr,
    /// Build-time generation of a static page.
    Prerender,
}

/// How inline content is authorized in the CSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CspStrategy {
    Nonce,
    Hash { scripts: bool, styles: bool },
    None,
}

/// CSP hash sources collected from the document, quoted (`'sha256-…'`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectedHashes {
    pub script: BTreeSet<String>,
    pub style: BTreeSet<String>,
}

/// State owned by one in-flight response.
#[derive(Debug)]
pub struct RequestContext {
    pub route: String,
    pub rules: Arc<SecurityRules>,
    pub mode: RenderMode,
    pub hashes: CollectedHashes,
    nonce: Option<String>,
    csp: Option<ContentSecurityPolicy>,
}

impl RequestContext {
    pub fn new(resolved: ResolvedRoute, mode: RenderMode) -> Self {
        Self {
            route: resolved.route,
            rules: resolved.rules,
            mode,
            hashes: CollectedHashes::default(),
            nonce: None,
            csp: None,
        }
    }

    pub fn strategy(&self) -> CspStrategy {
        match self.mode {
            RenderMode::Ssr if self.rules.nonce == Some(true) => CspStrategy::Nonce,
            RenderMode::Ssr => CspStrategy::None,
            RenderMode::Prerender => match self.rules.ssg() {
                Some(ssg) => CspStrategy::Hash {
                    scripts: ssg.hash_scripts.unwrap_or(false),
                    styles: ssg.hash_styles.unwrap_or(false),
                },
                None => CspStrategy::None,
            },
        }
    }

    /// The response nonce, generated on first use.
    pub fn ensure_nonce(&mut self) -> &str {
        self.nonce.get_or_insert_with(|| {
            let mut bytes = [0u8; NONCE_BYTES];
            rand::thread_rng().fill_bytes(&mut bytes);
            BASE64.encode(bytes)
        })
    }

    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// CSP as configured for the route, before runtime substitution.
    pub fn configured_csp(&self) -> Option<&ContentSecurityPolicy> {
        self.rules
            .headers()?
            .content_security_policy
            .as_ref()?
            .enabled()
    }

    /// Substitutes the nonce and collected hashes into the configured policy.
    ///
    /// Safe to call more than once; the result always reflects current state.
    pub fn finalize_csp(&mut self) -> Option<&ContentSecurityPolicy> {
        let finalized = self.configured_csp().map(|csp| {
            for directive in csp.unplaced_hash_directives(&self.hashes.script, &self.hashes.style) {
                tracing::warn!(
                    route = %self.route,
                    directive,
                    "Inline hashes collected but the policy has no such directive; hashes dropped"
                );
                metrics::record_hashes_dropped(directive);
            }
            csp.with_runtime_sources(self.nonce.as_deref(), &self.hashes.script, &self.hashes.style)
        });
        self.csp = finalized;
        self.csp.as_ref()
    }

    /// Policy produced by the last [`finalize_csp`](Self::finalize_csp) call.
    pub fn finalized_csp(&self) -> Option<&ContentSecurityPolicy> {
        self.csp.as_ref()
    }
}
