//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or WAYPOINT_* environment
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServiceConfig (validated, immutable)
//!     → read once by Engine::new and the binary
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{from_env, load_config, ConfigError};
pub use schema::{
    ListenerConfig, LoadShedConfig, LogConfig, ObservabilityConfig, RateLimitConfig,
    ServiceConfig, SystemConfig, DEFAULT_TRACE_KEY,
};
