//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request path
//!     → router.rs (scan compiled patterns)
//!     → matcher.rs (segment-wise match)
//!     → Return: every matching pattern, least specific first
//!
//! Route Compilation (at rule-set build):
//!     route_rules keys
//!     → Parse into RoutePattern
//!     → Sort by specificity
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled once per rule set, immutable at runtime
//! - No regex in hot path
//! - Deterministic: same input always yields the same match order
//! - All matches are returned; the rules engine merges them

pub mod matcher;
pub mod router;

pub use matcher::RoutePattern;
pub use router::RouteTable;
