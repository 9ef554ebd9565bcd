//! Integrity hashing for SRI attributes and CSP hash sources.
//!
//! # Data Flow
//! ```text
//! Build time:
//!     public dir → assets.rs (hash every file once) → AssetDigests
//!     → sri-hashes.json / Arc held by the server
//!
//! Response time:
//!     inline <script>/<style> content → DigestCache → 'sha256-…'
//! ```
//!
//! # Design Decisions
//! - Digests depend on content bytes only, never on request state
//! - The cache is bounded and only ever holds complete digests

pub mod assets;
pub mod digest;

pub use assets::{AssetDigests, SRI_HASHES_FILE};
pub use digest::{digest, DigestCache, HashAlgorithm, IntegrityDigest};
