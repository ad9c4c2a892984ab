//! # operator-config
//!
//! Configuration for the AI operator. Reads from `operator.toml` and then
//! applies environment variable overrides.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    BridgeConfig, ConfigWarning, DatabaseConfig, LoggingConfig, MemoryConfig, OperatorConfig,
    PromptCacheConfig, RegistryConfig, SelectorConfig, WarningSeverity,
};
