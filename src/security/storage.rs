//! Rate-limiter storage backends and driver selection.
//!
//! # Responsibilities
//! - Map a configured driver name + options to a storage handle
//! - Provide atomic increment-with-expiry per key
//!
//! # Design Decisions
//! - Selected once when the server starts, never per request
//! - `lruCache` (default) is bounded; least recently seen clients are evicted
//! - `memory` is unbounded and only meant for tests and tiny deployments

use std::fmt::Debug;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;

use crate::error::{ConfigurationError, StorageError};
use crate::rules::DriverConfig;

const DEFAULT_LRU_MAX: usize = 1000;

/// Result of one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Requests seen in the current window, including this one.
    pub count: u64,
    /// Time until the window resets.
    pub resets_in: Duration,
}

pub trait RateLimitStorage: Send + Sync + Debug {
    /// Driver name, used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Atomically counts one request for `key` in a window of length `ttl`.
    fn increment(&self, key: &str, ttl: Duration) -> Result<Hit, StorageError>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started: Instant,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self { count: 0, started: now }
    }

    fn hit(&mut self, now: Instant, ttl: Duration) -> Hit {
        let elapsed = now.duration_since(self.started);
        if elapsed >= ttl {
            *self = Window::new(now);
        }
        self.count += 1;
        Hit {
            count: self.count,
            resets_in: ttl.saturating_sub(now.duration_since(self.started)),
        }
    }
}

/// Bounded in-memory store.
#[derive(Debug)]
pub struct LruStorage {
    windows: Mutex<LruCache<String, Window>>,
}

impl LruStorage {
    pub fn new(max: NonZeroUsize) -> Self {
        Self {
            windows: Mutex::new(LruCache::new(max)),
        }
    }
}

impl RateLimitStorage for LruStorage {
    fn name(&self) -> &'static str {
        "lruCache"
    }

    fn increment(&self, key: &str, ttl: Duration) -> Result<Hit, StorageError> {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| StorageError::Unavailable("rate limiter cache lock poisoned".to_string()))?;
        let window = windows.get_or_insert_mut(key.to_string(), || Window::new(now));
        Ok(window.hit(now, ttl))
    }
}

/// Unbounded concurrent store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    windows: DashMap<String, Window>,
}

impl RateLimitStorage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn increment(&self, key: &str, ttl: Duration) -> Result<Hit, StorageError> {
        let now = Instant::now();
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| Window::new(now));
        Ok(window.hit(now, ttl))
    }
}

/// Builds the storage handle named by `driver`.
pub fn select_storage(driver: &DriverConfig) -> Result<Arc<dyn RateLimitStorage>, ConfigurationError> {
    let invalid = |option: &str, reason: &str| ConfigurationError::InvalidDriverOption {
        driver: driver.name.clone(),
        option: option.to_string(),
        reason: reason.to_string(),
    };

    let storage: Arc<dyn RateLimitStorage> = match driver.name.as_str() {
        "lruCache" => {
            let mut max = DEFAULT_LRU_MAX;
            for (option, value) in &driver.options {
                match (option.as_str(), value) {
                    ("max", toml::Value::Integer(n)) => {
                        max = usize::try_from(*n)
                            .ok()
                            .filter(|n| *n > 0)
                            .ok_or_else(|| invalid("max", "must be a positive integer"))?;
                    }
                    ("max", _) => return Err(invalid("max", "must be a positive integer")),
                    (other, _) => return Err(invalid(other, "unknown option")),
                }
            }
            let max = NonZeroUsize::new(max).ok_or_else(|| invalid("max", "must be a positive integer"))?;
            Arc::new(LruStorage::new(max))
        }
        "memory" => {
            if let Some(option) = driver.options.keys().next() {
                return Err(invalid(option, "unknown option"));
            }
            Arc::new(MemoryStorage::default())
        }
        other => return Err(ConfigurationError::UnknownDriver(other.to_string())),
    };

    tracing::debug!(driver = storage.name(), "Rate limiter storage selected");
    Ok(storage)
}
