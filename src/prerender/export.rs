//! Header rules for static hosts.
//!
//! | preset  | file                  | pattern syntax          |
//! |---------|-----------------------|-------------------------|
//! | netlify | `_headers`            | `/**` → `/*`            |
//! | vercel  | `vercel-headers.json` | `/**` → `/(.*)`         |

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;

use crate::config::{ExportPreset, RouteRule};
use crate::error::StorageError;

pub const NETLIFY_FILE: &str = "_headers";
pub const VERCEL_FILE: &str = "vercel-headers.json";

#[derive(Serialize)]
struct VercelConfig<'a> {
    headers: Vec<VercelRoute<'a>>,
}

#[derive(Serialize)]
struct VercelRoute<'a> {
    source: String,
    headers: Vec<VercelHeader<'a>>,
}

#[derive(Serialize)]
struct VercelHeader<'a> {
    key: &'a str,
    value: &'a str,
}

/// Routes that carry at least one header, in configuration order.
fn routes_with_headers(
    rules: &IndexMap<String, RouteRule>,
) -> impl Iterator<Item = (&str, &IndexMap<String, String>)> {
    rules
        .iter()
        .filter(|(_, rule)| !rule.headers.is_empty())
        .map(|(pattern, rule)| (pattern.as_str(), &rule.headers))
}

/// Netlify `_headers` file contents.
pub fn netlify_headers(rules: &IndexMap<String, RouteRule>) -> String {
    let mut out = String::new();
    for (pattern, headers) in routes_with_headers(rules) {
        out.push_str(&netlify_pattern(pattern));
        out.push('\n');
        for (name, value) in headers {
            out.push_str("  ");
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
    }
    out
}

/// Vercel `headers` configuration as JSON.
pub fn vercel_headers(rules: &IndexMap<String, RouteRule>) -> Result<String, StorageError> {
    let config = VercelConfig {
        headers: routes_with_headers(rules)
            .map(|(pattern, headers)| VercelRoute {
                source: vercel_pattern(pattern),
                headers: headers
                    .iter()
                    .map(|(key, value)| VercelHeader { key, value })
                    .collect(),
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&config)?)
}

/// Writes the preset file into `output_dir` and returns its path.
pub async fn export(
    preset: ExportPreset,
    rules: &IndexMap<String, RouteRule>,
    output_dir: &Path,
) -> Result<PathBuf, StorageError> {
    let (file, contents) = match preset {
        ExportPreset::Netlify => (NETLIFY_FILE, netlify_headers(rules)),
        ExportPreset::Vercel => (VERCEL_FILE, vercel_headers(rules)?),
    };
    tokio::fs::create_dir_all(output_dir).await?;
    let path = output_dir.join(file);
    tokio::fs::write(&path, contents).await?;
    tracing::info!(preset = ?preset, file = %path.display(), "Exported header rules");
    Ok(path)
}

fn netlify_pattern(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| if segment == "**" { "*" } else { segment })
        .collect::<Vec<_>>()
        .join("/")
}

fn vercel_pattern(pattern: &str) -> String {
    pattern
        .split('/')
        .map(|segment| match segment {
            "**" => "(.*)".to_string(),
            "*" => ":segment".to_string(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> IndexMap<String, RouteRule> {
        let mut rules = IndexMap::new();
        for (pattern, name, value) in [
            ("/", "X-Frame-Options", "DENY"),
            ("/blog/**", "Referrer-Policy", "no-referrer"),
        ] {
            let mut rule = RouteRule::default();
            rule.headers.insert(name.to_string(), value.to_string());
            rules.insert(pattern.to_string(), rule);
        }
        rules.insert("/empty".to_string(), RouteRule::default());
        rules
    }

    #[test]
    fn test_netlify_format() {
        assert_eq!(
            netlify_headers(&rules()),
            "/\n  X-Frame-Options: DENY\n/blog/*\n  Referrer-Policy: no-referrer\n"
        );
    }

    #[test]
    fn test_vercel_format() {
        let json: serde_json::Value = serde_json::from_str(&vercel_headers(&rules()).unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "headers": [
                    { "source": "/", "headers": [{ "key": "X-Frame-Options", "value": "DENY" }] },
                    { "source": "/blog/(.*)", "headers": [{ "key": "Referrer-Policy", "value": "no-referrer" }] }
                ]
            })
        );
    }

    #[tokio::test]
    async fn test_export_writes_preset_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = export(ExportPreset::Netlify, &rules(), dir.path()).await.unwrap();
        assert_eq!(path, dir.path().join(NETLIFY_FILE));
        assert!(std::fs::read_to_string(path).unwrap().starts_with("/\n"));
    }
}
