//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + ERS_PROXY_PASSWORD
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → context root applied to the running proxy
//! ```
//!
//! # Design Decisions
//! - The upstream endpoint is fixed for the life of the process
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    ListenerConfig, LogFormat, ObservabilityConfig, ProxyConfig, SessionConfig, TimeoutConfig,
    TlsConfig, UpstreamConfig,
};
