//! Build-time security pass over prerendered HTML.
//!
//! # Data Flow
//! ```text
//! input dir
//!     → integrity: hash bundled assets, save sri-hashes.json
//!     → every *.html file, one task each:
//!         path → RuleSet → RequestContext (prerender mode)
//!         → HtmlPipeline (SRI, inline hashes, <meta> CSP) → file rewritten
//!         → store.rs record(path, resolved headers)
//!     → store.rs flush → headers.json
//!     → merge_into_route_rules → export.rs (netlify / vercel), if enabled
//! ```
//!
//! # Design Decisions
//! - A page that fails to process is logged and skipped; the pass continues
//! - Headers are recorded exactly as the server would emit them

pub mod export;
pub mod store;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::config::ProxyConfig;
use crate::error::{PrerenderError, StorageError};
use crate::integrity::{AssetDigests, SRI_HASHES_FILE};
use crate::pipeline::{HtmlPipeline, RenderMode, RequestContext};
use crate::rules::{HookRegistry, RuleSet};
use crate::security::resolved_header_map;

pub use store::{merge_into_route_rules, PrerenderedHeadersStore, PrerenderedRecord};

/// Outcome of one prerender pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerenderSummary {
    pub pages: usize,
    pub skipped: usize,
    pub assets: usize,
    pub exported: Option<PathBuf>,
}

/// Runs the security pass over the prerendered site in `input_dir`.
pub async fn run_prerender(
    config: &ProxyConfig,
    input_dir: &Path,
    hooks: &HookRegistry,
) -> Result<PrerenderSummary, PrerenderError> {
    let rules = Arc::new(RuleSet::build(&config.security, &config.route_rules, hooks)?);
    let security_dir = config.build.security_dir();

    let asset_dir = config.build.public_dir.as_deref().unwrap_or(input_dir);
    let assets = AssetDigests::hash_directory(asset_dir, config.build.sri_algorithm, &config.build.base_url)?;
    assets.save(&security_dir.join(SRI_HASHES_FILE))?;
    let asset_count = assets.len();

    let pipeline = Arc::new(HtmlPipeline::new(Arc::new(assets)));
    let store = PrerenderedHeadersStore::open(&security_dir).await?;
    store.reset().await?;

    let mut tasks = JoinSet::new();
    for file in html_files(input_dir)? {
        let Some(path) = route_path(input_dir, &file) else {
            continue;
        };
        let rules = rules.clone();
        let pipeline = pipeline.clone();
        let store = store.clone();
        tasks.spawn(async move {
            let result = process_page(&file, &path, &rules, &pipeline, &store).await;
            if let Err(e) = &result {
                tracing::warn!(path = %path, file = %file.display(), error = %e, "Prerendered page skipped");
            }
            result
        });
    }

    let (mut pages, mut skipped) = (0, 0);
    while let Some(joined) = tasks.join_next().await {
        match joined? {
            Ok(true) => pages += 1,
            Ok(false) | Err(_) => skipped += 1,
        }
    }

    let recorded = store.flush().await?;

    let export_enabled = rules
        .global()
        .ssg()
        .and_then(|ssg| ssg.export_to_presets)
        .unwrap_or(false);
    let exported = match config.build.preset {
        Some(preset) if export_enabled => {
            let merged = merge_into_route_rules(&recorded, &config.route_rules);
            Some(export::export(preset, &merged, &config.build.output_dir).await?)
        }
        _ => None,
    };

    tracing::info!(pages, skipped, assets = asset_count, "Prerender security pass finished");
    Ok(PrerenderSummary {
        pages,
        skipped,
        assets: asset_count,
        exported,
    })
}

/// Rewrites one page and records its headers. `Ok(false)` when the route
/// has the security layer switched off.
async fn process_page(
    file: &Path,
    path: &str,
    rules: &RuleSet,
    pipeline: &HtmlPipeline,
    store: &PrerenderedHeadersStore,
) -> Result<bool, StorageError> {
    let resolved = rules.rules_for_path(path);
    if !resolved.rules.is_enabled() {
        return Ok(false);
    }

    let body = tokio::fs::read(file).await?;
    let mut ctx = RequestContext::new(resolved, RenderMode::Prerender);
    let output = pipeline.run(&body, &mut ctx);
    if output.as_ref() != body.as_slice() {
        tokio::fs::write(file, output.as_ref()).await?;
    }

    let headers: BTreeMap<String, String> = resolved_header_map(&ctx).into_iter().collect();
    store.record(path, headers).await?;
    Ok(true)
}

fn html_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().and_then(|ext| ext.to_str()) == Some("html") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// URL path served by `file`: `about/index.html` → `/about`.
fn route_path(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let mut segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.last().map(String::as_str) == Some("index.html") {
        segments.pop();
    }
    Some(format!("/{}", segments.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_path_mapping() {
        let root = Path::new("/site");
        assert_eq!(route_path(root, Path::new("/site/index.html")).as_deref(), Some("/"));
        assert_eq!(route_path(root, Path::new("/site/about/index.html")).as_deref(), Some("/about"));
        assert_eq!(route_path(root, Path::new("/site/404.html")).as_deref(), Some("/404.html"));
        assert_eq!(route_path(root, Path::new("/elsewhere/x.html")), None);
    }
}
