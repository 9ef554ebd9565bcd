//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, trace)
//!     → security middleware (rules, rate limit, pipeline, headers)
//!     → proxy_handler (forward to upstream)
//!     → Send to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
