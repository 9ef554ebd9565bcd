//! Content-Security-Policy structured form.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ConfigurationError;
use crate::headers::WireFormat;

/// Source token replaced by the per-response nonce.
pub const NONCE_PLACEHOLDER: &str = "'nonce-{{nonce}}'";

/// Directives that take no source list.
const FLAG_DIRECTIVES: [&str; 2] = ["upgrade-insecure-requests", "block-all-mixed-content"];

/// Directives that browsers ignore when delivered through a `<meta>` tag.
const HEADER_ONLY_DIRECTIVES: [&str; 4] = ["frame-ancestors", "report-uri", "report-to", "sandbox"];

/// Value of one directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CspDirective {
    /// Valueless directive, rendered as `name;` when `true`, omitted when `false`.
    Flag(bool),
    /// Ordered source expressions.
    Sources(Vec<String>),
}

impl CspDirective {
    pub fn sources<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CspDirective::Sources(sources.into_iter().map(Into::into).collect())
    }

    /// Canonical form: flat whitespace-free tokens, flags only where they mean something.
    fn canonical(self, name: &str) -> Self {
        let is_flag_directive = FLAG_DIRECTIVES.contains(&name);
        match self {
            CspDirective::Flag(true) if !is_flag_directive => CspDirective::Sources(Vec::new()),
            CspDirective::Sources(sources) if sources.is_empty() && is_flag_directive => {
                CspDirective::Flag(true)
            }
            CspDirective::Sources(sources) => CspDirective::Sources(
                sources
                    .iter()
                    .flat_map(|source| source.split_whitespace())
                    .map(str::to_string)
                    .collect(),
            ),
            flag => flag,
        }
    }
}

impl Serialize for CspDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CspDirective::Flag(flag) => serializer.serialize_bool(*flag),
            CspDirective::Sources(sources) => sources.serialize(serializer),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DirectiveRepr {
    Flag(bool),
    Text(String),
    List(Vec<String>),
}

impl<'de> Deserialize<'de> for CspDirective {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match DirectiveRepr::deserialize(deserializer)? {
            DirectiveRepr::Flag(flag) => CspDirective::Flag(flag),
            DirectiveRepr::Text(text) => {
                CspDirective::Sources(text.split_whitespace().map(str::to_string).collect())
            }
            DirectiveRepr::List(list) => CspDirective::Sources(list),
        })
    }
}

/// Directive name → value, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ContentSecurityPolicy {
    directives: IndexMap<String, CspDirective>,
}

impl<'de> Deserialize<'de> for ContentSecurityPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = IndexMap::<String, CspDirective>::deserialize(deserializer)?;
        let mut policy = ContentSecurityPolicy::default();
        for (name, directive) in raw {
            policy.insert(name, directive);
        }
        Ok(policy)
    }
}

impl ContentSecurityPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, directive: CspDirective) -> Self {
        self.insert(name, directive);
        self
    }

    /// Inserts or replaces a directive, keeping its original position.
    pub fn insert(&mut self, name: impl AsRef<str>, directive: CspDirective) {
        let name = name.as_ref().trim().to_ascii_lowercase();
        let directive = directive.canonical(&name);
        self.directives.insert(name, directive);
    }

    pub fn get(&self, name: &str) -> Option<&CspDirective> {
        self.directives.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CspDirective)> {
        self.directives.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.directives.is_empty()
    }

    pub(crate) fn directives_mut(&mut self) -> &mut IndexMap<String, CspDirective> {
        &mut self.directives
    }

    /// Hard-coded `'nonce-…'` sources other than the placeholder.
    pub fn static_nonces(&self) -> Vec<(&str, &str)> {
        self.directives
            .iter()
            .filter_map(|(name, directive)| match directive {
                CspDirective::Sources(sources) => Some((name, sources)),
                CspDirective::Flag(_) => None,
            })
            .flat_map(|(name, sources)| {
                sources
                    .iter()
                    .filter(|source| is_static_nonce(source))
                    .map(move |source| (name.as_str(), source.as_str()))
            })
            .collect()
    }

    /// Substitutes the nonce placeholder and appends collected hashes.
    ///
    /// Without a nonce the placeholder is dropped. Hard-coded nonces are
    /// always dropped. Hashes are only added to directives that exist.
    pub fn with_runtime_sources(
        &self,
        nonce: Option<&str>,
        script_hashes: &BTreeSet<String>,
        style_hashes: &BTreeSet<String>,
    ) -> Self {
        let directives = self
            .directives
            .iter()
            .map(|(name, directive)| {
                let directive = match directive {
                    CspDirective::Flag(flag) => CspDirective::Flag(*flag),
                    CspDirective::Sources(sources) => {
                        let mut resolved: Vec<String> = sources
                            .iter()
                            .filter(|source| !is_static_nonce(source))
                            .filter_map(|source| {
                                if source == NONCE_PLACEHOLDER {
                                    nonce.map(|nonce| format!("'nonce-{nonce}'"))
                                } else {
                                    Some(source.clone())
                                }
                            })
                            .collect();
                        let hashes = match name.as_str() {
                            "script-src" => Some(script_hashes),
                            "style-src" => Some(style_hashes),
                            _ => None,
                        };
                        for hash in hashes.into_iter().flatten() {
                            if !resolved.contains(hash) {
                                resolved.push(hash.clone());
                            }
                        }
                        CspDirective::Sources(resolved)
                    }
                };
                (name.clone(), directive)
            })
            .collect();
        Self { directives }
    }

    /// Directives that would receive collected hashes but are missing from
    /// the policy (or are not source lists), so the hashes cannot be applied.
    pub fn unplaced_hash_directives(
        &self,
        script_hashes: &BTreeSet<String>,
        style_hashes: &BTreeSet<String>,
    ) -> Vec<&'static str> {
        [("script-src", script_hashes), ("style-src", style_hashes)]
            .into_iter()
            .filter(|(name, hashes)| {
                !hashes.is_empty() && !matches!(self.get(name), Some(CspDirective::Sources(_)))
            })
            .map(|(name, _)| name)
            .collect()
    }

    /// Policy usable in `<meta http-equiv>`; header-only directives removed.
    pub fn for_meta_tag(&self) -> Self {
        let directives = self
            .directives
            .iter()
            .filter(|(name, _)| !HEADER_ONLY_DIRECTIVES.contains(&name.as_str()))
            .map(|(name, directive)| (name.clone(), directive.clone()))
            .collect();
        Self { directives }
    }
}

fn is_static_nonce(source: &str) -> bool {
    source.starts_with("'nonce-") && source != NONCE_PLACEHOLDER
}

impl WireFormat for ContentSecurityPolicy {
    const FAMILY: &'static str = "Content-Security-Policy";

    fn to_wire(&self) -> String {
        self.directives
            .iter()
            .filter_map(|(name, directive)| match directive {
                CspDirective::Flag(false) => None,
                CspDirective::Flag(true) => Some(format!("{name};")),
                CspDirective::Sources(sources) if sources.is_empty() => Some(format!("{name};")),
                CspDirective::Sources(sources) => Some(format!("{name} {};", sources.join(" "))),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn from_wire(literal: &str) -> Result<Self, ConfigurationError> {
        let mut policy = ContentSecurityPolicy::default();
        for part in literal.split(';') {
            let mut tokens = part.split_whitespace();
            let Some(name) = tokens.next() else {
                continue;
            };
            let name = name.to_ascii_lowercase();
            if policy.directives.contains_key(&name) {
                // Browsers honour the first occurrence only.
                continue;
            }
            let sources: Vec<String> = tokens.map(str::to_string).collect();
            let directive = if sources.is_empty() {
                CspDirective::Flag(true)
            } else {
                CspDirective::Sources(sources)
            };
            policy.insert(name, directive);
        }
        Ok(policy)
    }
}
