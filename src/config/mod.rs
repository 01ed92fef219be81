//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → ApiClient::from_config
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → ReloadFilter forwards [retries] if it changed
//!     → ApiClient swaps in a new RetryPolicy
//!     → calls already running keep the policy they started with
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only the retry policy is hot-reloadable; endpoint and auth changes need
//!   a new client

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    ApiConfig, AuthConfig, ClientConfig, ClientCredentialsConfig, JwtBearerConfig, LogFormat,
    ObservabilityConfig, RetryConfig, SoapLoginConfig, StaticTokenConfig,
};
pub use watcher::{ConfigWatcher, ReloadFilter};
