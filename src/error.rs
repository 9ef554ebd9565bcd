//! Error taxonomy for the security layer.
//!
//! Only [`ConfigurationError`] is allowed to stop the process. Every other
//! error degrades the security layer (pass-through body, omitted attribute,
//! disabled limiter) and is reported through `tracing` and metrics.

use std::path::PathBuf;
use thiserror::Error;

/// Malformed or impossible configuration, detected at startup or reload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("invalid value for header `{header}`: {reason}")]
    InvalidHeader { header: String, reason: String },

    #[error("invalid upstream address `{0}`")]
    InvalidUpstream(String),

    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("unknown rate limiter storage driver `{0}`")]
    UnknownDriver(String),

    #[error("invalid option `{option}` for storage driver `{driver}`: {reason}")]
    InvalidDriverOption {
        driver: String,
        option: String,
        reason: String,
    },

    #[error("invalid security rules for route `{route}`: {reason}")]
    InvalidRule { route: String, reason: String },
}

/// HTML body could not be tokenized. The body is passed through untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("response body is not valid UTF-8")]
    NotUtf8,

    #[error("document ends inside a tag or comment")]
    TruncatedMarkup,

    #[error("missing closing </{tag}> for element starting at byte {offset}")]
    UnterminatedRawText { tag: String, offset: usize },
}

/// A bundled asset could not be read for hashing.
#[derive(Debug, Error)]
#[error("failed to hash asset {path:?}: {source}")]
pub struct HashComputationError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Shared storage (prerender records, rate limiter) is unavailable.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// Failure of a prerender pass run from the command line.
#[derive(Debug, Error)]
pub enum PrerenderError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("prerender I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("prerender worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
