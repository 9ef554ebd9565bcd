//! Build-time digests of bundled static assets.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{HashComputationError, StorageError};
use crate::integrity::digest::{digest, HashAlgorithm, IntegrityDigest};

/// File name of the persisted digest map inside the build output.
pub const SRI_HASHES_FILE: &str = "sri-hashes.json";

/// URL path (`/_nuxt/app.js`) → digest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetDigests {
    digests: BTreeMap<String, IntegrityDigest>,
}

impl AssetDigests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hashes every file below `dir` once.
    ///
    /// Keys are URL paths rooted at `base_url`. Unreadable files are logged
    /// and left out; only a missing or unreadable root is an error.
    pub fn hash_directory(
        dir: &Path,
        algorithm: HashAlgorithm,
        base_url: &str,
    ) -> std::io::Result<Self> {
        let mut assets = Self::new();
        let mut pending = vec![dir.to_path_buf()];
        let prefix = base_url.trim_end_matches('/');

        while let Some(current) = pending.pop() {
            let entries = match fs::read_dir(&current) {
                Ok(entries) => entries,
                Err(e) if current == dir => return Err(e),
                Err(e) => {
                    tracing::warn!(path = %current.display(), error = %e, "Skipping unreadable asset directory");
                    continue;
                }
            };

            for entry in entries.flatten() {
                let path = entry.path();
                match entry.file_type() {
                    Ok(kind) if kind.is_dir() => pending.push(path),
                    Ok(kind) if kind.is_file() => match hash_file(&path, algorithm) {
                        Ok(value) => {
                            assets.insert(url_path(prefix, dir, &path), value);
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Integrity attribute omitted for asset");
                            metrics::counter!("security_asset_hash_failures_total").increment(1);
                        }
                    },
                    _ => {}
                }
            }
        }

        tracing::info!(
            dir = %dir.display(),
            assets = assets.len(),
            algorithm = algorithm.name(),
            "Hashed bundled assets"
        );
        Ok(assets)
    }

    pub fn insert(&mut self, url_path: impl Into<String>, value: IntegrityDigest) {
        self.digests.insert(url_path.into(), value);
    }

    /// Looks up the digest referenced by a `src` / `href` attribute.
    pub fn get(&self, reference: &str) -> Option<&IntegrityDigest> {
        let end = reference.find(['?', '#']).unwrap_or(reference.len());
        self.digests.get(&reference[..end])
    }

    pub fn len(&self) -> usize {
        self.digests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.digests.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn hash_file(path: &Path, algorithm: HashAlgorithm) -> Result<IntegrityDigest, HashComputationError> {
    let content = fs::read(path).map_err(|source| HashComputationError {
        path: PathBuf::from(path),
        source,
    })?;
    Ok(digest(&content, algorithm))
}

fn url_path(prefix: &str, root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("{prefix}/{}", segments.join("/"))
}
