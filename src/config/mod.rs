//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, trial rule set build)
//!     → ProxyConfig (validated, immutable)
//!     → RuleSet built from [security] + [route_rules]
//!
//! On reload signal:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server rebuilds the RuleSet and swaps it atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BuildConfig, ExportPreset, ListenerConfig, ProxyConfig, RouteRule, UpstreamConfig};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
