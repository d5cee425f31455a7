//! Hierarchical, hot-reloadable system configuration.
//!
//! A configuration is assembled from four layers, later layers winning on
//! conflicting dotted keys:
//!
//! 1. Defaults baked into the section types ([`models`])
//! 2. Active rows of the `system_config` table ([`database`])
//! 3. The YAML configuration file
//! 4. Process environment variables ([`merge::ENV_OVERRIDES`])
//!
//! The merged tree is deserialized, validated and checked for production
//! secrets before it is published. Readers always observe either the
//! previous configuration or the new one in full.
//!
//! ## Components
//!
//! - [`loader`]: builds one [`SystemConfiguration`] from all layers
//! - [`manager`]: owns the published configuration, reloads and watches
//! - [`merge`]: dotted-key tree operations and the environment table
//! - [`secrets`]: production secret enforcement and development placeholders
//!
//! ## Usage
//!
//! ```rust,no_run
//! use docaiche::config::{ConfigurationLoader, ConfigurationManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = Arc::new(ConfigurationManager::new(ConfigurationLoader::from_environment()));
//!     let config = manager.load_configuration().await?;
//!     println!("primary provider: {}", config.ai.primary_provider);
//!     Ok(())
//! }
//! ```

pub mod database;
pub mod loader;
pub mod manager;
pub mod merge;
pub mod models;
pub mod secrets;

pub use database::{DatabaseError, DatabaseManager};
pub use loader::ConfigurationLoader;
pub use manager::{ConfigUpdateReport, ConfigWatcherHandle, ConfigurationManager};
pub use merge::{EnvSource, ENV_OVERRIDES};
pub use models::SystemConfiguration;

#[cfg(feature = "sqlite")]
pub use database::SqliteDatabaseManager;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    /// YAML file could not be parsed
    #[error("Invalid YAML in {path}: {message}")]
    Yaml { path: String, message: String },

    /// Merged tree does not fit the configuration types
    #[error("Configuration structure error: {0}")]
    Deserialize(String),

    /// One or more values out of bounds
    #[error("Configuration validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Production deployment without required secrets
    #[error("Missing required secrets: {}", .0.join(", "))]
    MissingSecrets(Vec<String>),

    /// Database write failed; reads never surface this
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Nothing has been loaded yet
    #[error("Configuration has not been loaded")]
    NotLoaded,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigurationError>;
