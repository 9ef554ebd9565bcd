//! Pipeline stages. Each runs once, in order, over the same tree.

use crate::headers::WireFormat;
use crate::integrity::{AssetDigests, DigestCache, HashAlgorithm};
use crate::pipeline::context::{CspStrategy, RenderMode, RequestContext};
use crate::pipeline::tree::{Element, ElementId, HtmlTree};

/// CSP hash sources for inline content always use sha256.
const INLINE_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssetKind {
    Script,
    Style,
}

/// Classifies elements that load a script or stylesheet by URL.
fn external_asset(element: &Element) -> Option<(AssetKind, &str)> {
    match element.name() {
        "script" => element.attr("src").map(|src| (AssetKind::Script, src)),
        "link" => {
            let href = element.attr("href")?;
            let rel = element.rel_tokens();
            let kind = if rel.iter().any(|r| r == "stylesheet") {
                AssetKind::Style
            } else if rel.iter().any(|r| r == "modulepreload") {
                AssetKind::Script
            } else if rel.iter().any(|r| r == "preload") {
                match element.attr("as").map(str::to_ascii_lowercase).as_deref() {
                    Some("script") => AssetKind::Script,
                    Some("style") => AssetKind::Style,
                    _ => return None,
                }
            } else {
                return None;
            };
            Some((kind, href))
        }
        _ => None,
    }
}

/// Elements of any of `tags`, in document order.
fn elements<T: HtmlTree>(tree: &T, tags: &[&str]) -> Vec<ElementId> {
    let mut ids: Vec<ElementId> = tags.iter().flat_map(|tag| tree.find_elements(tag)).collect();
    ids.sort();
    ids
}

/// Attaches SRI attributes and, in hash mode, collects CSP hash sources.
pub fn integrity<T: HtmlTree>(
    tree: &mut T,
    ctx: &mut RequestContext,
    assets: &AssetDigests,
    digests: &DigestCache,
) {
    if ctx.rules.sri == Some(true) && !assets.is_empty() {
        for id in elements(tree, &["script", "link"]) {
            let Some(element) = tree.element_mut(id) else {
                continue;
            };
            if element.has_attr("integrity") {
                continue;
            }
            let Some(value) = external_asset(element).and_then(|(_, url)| assets.get(url)) else {
                continue;
            };
            let value = value.to_string();
            element.set_attr("integrity", value);
            if !element.has_attr("crossorigin") {
                element.set_attr("crossorigin", "anonymous");
            }
        }
    }

    let CspStrategy::Hash { scripts, styles } = ctx.strategy() else {
        return;
    };

    for id in elements(tree, &["script", "style", "link"]) {
        let Some(element) = tree.element(id) else {
            continue;
        };

        if let Some((kind, _)) = external_asset(element) {
            let wanted = match kind {
                AssetKind::Script => scripts,
                AssetKind::Style => styles,
            };
            let Some(integrity) = element.attr("integrity").filter(|_| wanted) else {
                continue;
            };
            let set = match kind {
                AssetKind::Script => &mut ctx.hashes.script,
                AssetKind::Style => &mut ctx.hashes.style,
            };
            for token in integrity.split_whitespace() {
                set.insert(format!("'{token}'"));
            }
            continue;
        }

        let (wanted, set) = match element.name() {
            "script" => (scripts, &mut ctx.hashes.script),
            "style" => (styles, &mut ctx.hashes.style),
            _ => continue,
        };
        if !wanted {
            continue;
        }
        match tree.inline_content(id) {
            Some(content) if !content.is_empty() => {
                set.insert(digests.digest(content.as_bytes(), INLINE_HASH_ALGORITHM).csp_source());
            }
            _ => {}
        }
    }
}

/// Applies the single response nonce to every script and style carrier.
pub fn nonce<T: HtmlTree>(tree: &mut T, ctx: &mut RequestContext) {
    if ctx.strategy() != CspStrategy::Nonce {
        return;
    }
    let nonce = ctx.ensure_nonce().to_string();

    for id in elements(tree, &["script", "style", "link"]) {
        let Some(element) = tree.element_mut(id) else {
            continue;
        };
        let carries_nonce = match element.name() {
            "script" | "style" => true,
            _ => element
                .rel_tokens()
                .iter()
                .any(|rel| matches!(rel.as_str(), "stylesheet" | "preload" | "modulepreload")),
        };
        if carries_nonce {
            element.set_attr("nonce", nonce.as_str());
        }
    }
}

/// Finalizes the policy and, for prerendered pages, mirrors it into `<head>`.
pub fn finalize_csp<T: HtmlTree>(tree: &mut T, ctx: &mut RequestContext) {
    let meta_enabled = ctx.mode == RenderMode::Prerender
        && ctx.rules.ssg().and_then(|ssg| ssg.meta) == Some(true);

    let Some(csp) = ctx.finalize_csp() else {
        return;
    };
    if !meta_enabled {
        return;
    }

    let content = csp.for_meta_tag().to_wire();
    if content.is_empty() {
        return;
    }
    if let Some(&head) = tree.find_elements("head").first() {
        tree.insert_after_start_tag(
            head,
            format!(
                "<meta http-equiv=\"Content-Security-Policy\" content=\"{}\">",
                content.replace('"', "&quot;")
            ),
        );
    }
}
