//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every degraded security decision is logged at `warn` and counted
//! - Request ID flows through all log events via the trace layer span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
