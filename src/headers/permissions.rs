//! Permissions-Policy structured form.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigurationError;
use crate::headers::WireFormat;

/// Feature name → allow-list, in configuration order.
///
/// An empty allow-list denies the feature everywhere (`camera=()`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionsPolicy {
    features: IndexMap<String, Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AllowListRepr {
    Text(String),
    List(Vec<String>),
}

impl<'de> Deserialize<'de> for PermissionsPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = IndexMap::<String, AllowListRepr>::deserialize(deserializer)?;
        let mut policy = PermissionsPolicy::default();
        for (feature, allow_list) in raw {
            let allow_list = match allow_list {
                AllowListRepr::Text(text) => parse_allow_list(&text),
                AllowListRepr::List(list) => list,
            };
            policy.insert(feature, allow_list);
        }
        Ok(policy)
    }
}

impl PermissionsPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<I, S>(mut self, feature: &str, allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(feature, allow_list.into_iter().map(Into::into).collect());
        self
    }

    pub fn insert(&mut self, feature: impl AsRef<str>, allow_list: Vec<String>) {
        let allow_list = allow_list
            .iter()
            .flat_map(|origin| origin.split_whitespace())
            .map(str::to_string)
            .collect();
        self.features
            .insert(feature.as_ref().trim().to_ascii_lowercase(), allow_list);
    }

    pub fn get(&self, feature: &str) -> Option<&[String]> {
        self.features.get(feature).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.features.iter()
    }

    pub(crate) fn features_mut(&mut self) -> &mut IndexMap<String, Vec<String>> {
        &mut self.features
    }
}

/// Parses `()`, `(self "https://a.example")` or the legacy bare `self`.
fn parse_allow_list(value: &str) -> Vec<String> {
    let value = value.trim();
    let inner = value
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .unwrap_or(value);
    inner.split_whitespace().map(str::to_string).collect()
}

impl WireFormat for PermissionsPolicy {
    const FAMILY: &'static str = "Permissions-Policy";

    fn to_wire(&self) -> String {
        self.features
            .iter()
            .map(|(feature, allow_list)| format!("{feature}=({})", allow_list.join(" ")))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn from_wire(literal: &str) -> Result<Self, ConfigurationError> {
        let mut policy = PermissionsPolicy::default();
        for entry in literal.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (feature, allow_list) =
                entry
                    .split_once('=')
                    .ok_or_else(|| ConfigurationError::InvalidHeader {
                        header: Self::FAMILY.to_string(),
                        reason: format!("expected `feature=(allow-list)`, got `{entry}`"),
                    })?;
            policy.insert(feature, parse_allow_list(allow_list));
        }
        Ok(policy)
    }
}
