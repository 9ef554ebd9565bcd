//! Durable per-path header records written during prerendering.
//!
//! Layout under the store directory:
//! ```text
//! headers/<hex sha256 of path>.json   one PrerenderedRecord per page
//! headers.json                        { "<path>": { "headers": { ... } } }
//! ```
//!
//! Records are written to a temporary file and renamed into place, so
//! concurrent workers never observe a half-written record.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RouteRule;
use crate::error::StorageError;

/// Consolidated artifact name.
pub const HEADERS_FILE: &str = "headers.json";

const RECORDS_DIR: &str = "headers";

/// Headers captured for one prerendered path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerenderedRecord {
    pub path: String,
    pub headers: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct RecordedHeaders<'a> {
    headers: &'a BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct PrerenderedHeadersStore {
    dir: PathBuf,
}

impl PrerenderedHeadersStore {
    /// Opens (creating if needed) the store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(dir.join(RECORDS_DIR)).await?;
        Ok(Self { dir })
    }

    /// Drops every record from earlier passes so the next flush reflects
    /// only pages recorded after this call.
    pub async fn reset(&self) -> Result<(), StorageError> {
        let records = self.dir.join(RECORDS_DIR);
        match tokio::fs::remove_dir_all(&records).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&records).await?;
        tracing::debug!(dir = %records.display(), "Cleared prerender records");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn headers_file(&self) -> PathBuf {
        self.dir.join(HEADERS_FILE)
    }

    /// Writes the record for `path`, replacing any earlier one.
    pub async fn record(
        &self,
        path: &str,
        headers: BTreeMap<String, String>,
    ) -> Result<(), StorageError> {
        let record = PrerenderedRecord {
            path: path.to_string(),
            headers,
        };
        let target = self.record_path(path);
        let temp = target.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4()));

        tokio::fs::write(&temp, serde_json::to_vec(&record)?).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::debug!(path, file = %target.display(), "Recorded prerendered headers");
        Ok(())
    }

    /// Reads every record once and writes the consolidated `headers.json`.
    ///
    /// Unreadable records are logged and left out.
    pub async fn flush(&self) -> Result<BTreeMap<String, BTreeMap<String, String>>, StorageError> {
        let mut recorded = BTreeMap::new();
        let mut entries = tokio::fs::read_dir(self.dir.join(RECORDS_DIR)).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file = entry.path();
            if file.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let parsed = match tokio::fs::read(&file).await {
                Ok(bytes) => serde_json::from_slice::<PrerenderedRecord>(&bytes).map_err(StorageError::from),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(record) => {
                    recorded.insert(record.path, record.headers);
                }
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "Skipping unreadable prerender record");
                }
            }
        }

        let artifact: BTreeMap<&str, RecordedHeaders<'_>> = recorded
            .iter()
            .map(|(path, headers)| (path.as_str(), RecordedHeaders { headers }))
            .collect();
        tokio::fs::write(self.headers_file(), serde_json::to_vec_pretty(&artifact)?).await?;

        tracing::info!(
            pages = recorded.len(),
            file = %self.headers_file().display(),
            "Prerendered headers flushed"
        );
        Ok(recorded)
    }

    fn record_path(&self, path: &str) -> PathBuf {
        let digest = Sha256::digest(path.as_bytes());
        let mut name = String::with_capacity(digest.len() * 2 + 5);
        for byte in digest {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".json");
        self.dir.join(RECORDS_DIR).join(name)
    }
}

/// Overlays recorded headers onto the static route rules.
///
/// Each record becomes the `headers` of its exact path; recorded values win
/// over statically declared ones, other declared headers are kept.
pub fn merge_into_route_rules(
    recorded: &BTreeMap<String, BTreeMap<String, String>>,
    static_rules: &IndexMap<String, RouteRule>,
) -> IndexMap<String, RouteRule> {
    let mut merged = static_rules.clone();
    for (path, headers) in recorded {
        let rule = merged.entry(path.clone()).or_default();
        for (name, value) in headers {
            rule.headers.insert(name.clone(), value.clone());
        }
    }
    merged
}
