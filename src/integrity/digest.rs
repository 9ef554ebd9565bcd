//! Content digests in integrity-string form.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use lru::LruCache;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Payloads above this size are hashed but never memoized.
const MAX_CACHED_PAYLOAD: usize = 64 * 1024;

/// Hash algorithm for integrity strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sha256" => Some(HashAlgorithm::Sha256),
            "sha384" => Some(HashAlgorithm::Sha384),
            "sha512" => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn hash(&self, content: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(content).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(content).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(content).to_vec(),
        }
    }
}

/// `<algorithm>-<base64>` digest of a byte payload.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct IntegrityDigest {
    algorithm: HashAlgorithm,
    encoded: String,
}

impl IntegrityDigest {
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Parses `sha384-…`. Returns `None` for unknown algorithms or empty hashes.
    pub fn parse(value: &str) -> Option<Self> {
        let (algorithm, encoded) = value.trim().split_once('-')?;
        let algorithm = HashAlgorithm::from_name(algorithm)?;
        if encoded.is_empty() {
            return None;
        }
        Some(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }

    /// Quoted CSP source expression, e.g. `'sha256-…'`.
    pub fn csp_source(&self) -> String {
        format!("'{self}'")
    }
}

impl fmt::Display for IntegrityDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algorithm.name(), self.encoded)
    }
}

impl Serialize for IntegrityDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IntegrityDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        IntegrityDigest::parse(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid integrity value `{value}`")))
    }
}

/// Pure digest of `content`.
pub fn digest(content: &[u8], algorithm: HashAlgorithm) -> IntegrityDigest {
    IntegrityDigest {
        algorithm,
        encoded: BASE64.encode(algorithm.hash(content)),
    }
}

/// Bounded memo for inline payload digests, shared across requests.
pub struct DigestCache {
    entries: Mutex<LruCache<(HashAlgorithm, Box<[u8]>), IntegrityDigest>>,
}

impl DigestCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Digest of `content`, computed at most once per cached payload.
    ///
    /// The lock is not held while hashing; entries are only inserted complete.
    pub fn digest(&self, content: &[u8], algorithm: HashAlgorithm) -> IntegrityDigest {
        if content.len() > MAX_CACHED_PAYLOAD {
            return digest(content, algorithm);
        }

        let key = (algorithm, Box::<[u8]>::from(content));
        if let Some(hit) = self.lock().get(&key) {
            return hit.clone();
        }

        let computed = digest(content, algorithm);
        self.lock().put(key, computed.clone());
        computed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<(HashAlgorithm, Box<[u8]>), IntegrityDigest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DigestCache {
    fn default() -> Self {
        Self::new(512)
    }
}

impl fmt::Debug for DigestCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestCache").field("entries", &self.len()).finish()
    }
}
