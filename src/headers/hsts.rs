//! Strict-Transport-Security structured form.

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::headers::WireFormat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrictTransportSecurity {
    /// Seconds the browser should remember HTTPS-only access.
    pub max_age: u64,
    #[serde(default)]
    pub include_subdomains: bool,
    #[serde(default)]
    pub preload: bool,
}

impl Default for StrictTransportSecurity {
    fn default() -> Self {
        Self {
            max_age: 15_552_000, // 180 days
            include_subdomains: true,
            preload: false,
        }
    }
}

impl WireFormat for StrictTransportSecurity {
    const FAMILY: &'static str = "Strict-Transport-Security";

    fn to_wire(&self) -> String {
        let mut value = format!("max-age={}", self.max_age);
        if self.include_subdomains {
            value.push_str("; includeSubDomains");
        }
        if self.preload {
            value.push_str("; preload");
        }
        value
    }

    fn from_wire(literal: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidHeader {
            header: Self::FAMILY.to_string(),
            reason,
        };

        let mut max_age = None;
        let mut include_subdomains = false;
        let mut preload = false;

        for directive in literal.split(';').map(str::trim).filter(|d| !d.is_empty()) {
            let (name, value) = match directive.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (directive, None),
            };
            match (name.to_ascii_lowercase().as_str(), value) {
                ("max-age", Some(seconds)) => {
                    let seconds = seconds
                        .parse()
                        .map_err(|_| invalid(format!("invalid max-age `{seconds}`")))?;
                    max_age = Some(seconds);
                }
                ("includesubdomains", None) => include_subdomains = true,
                ("preload", None) => preload = true,
                _ => return Err(invalid(format!("unexpected directive `{directive}`"))),
            }
        }

        Ok(Self {
            max_age: max_age.ok_or_else(|| invalid("missing max-age".to_string()))?,
            include_subdomains,
            preload,
        })
    }
}
