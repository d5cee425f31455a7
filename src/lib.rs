//! # DocAIche
//!
//! Core of a documentation caching service: a multi-provider LLM client with
//! failover and circuit breaking, and a hierarchical configuration system
//! with hot reload and database-backed runtime overrides.
//!
//! ## Architecture Overview
//!
//! - **[`llm`]**: provider abstraction, registry, circuit breaker, structured
//!   JSON parsing and the failover client
//! - **[`config`]**: layered configuration (defaults, database, YAML file,
//!   environment) with validation, secret policy and hot reload
//! - **[`services`]**: restart orchestration after runtime configuration changes
//! - **[`env`]**: environment variable names and default paths
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docaiche::config::{ConfigurationLoader, ConfigurationManager};
//! use docaiche::llm::{GenerationParams, LLMProviderClient, ProviderRegistry, TextResponse};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = ConfigurationManager::new(ConfigurationLoader::from_environment());
//!     let config = manager.load_configuration().await?;
//!
//!     let client = LLMProviderClient::from_config(&config.ai, ProviderRegistry::global())?;
//!     let answer: TextResponse = client
//!         .generate_structured("Summarize the tokio runtime", &GenerationParams::default())
//!         .await?;
//!
//!     println!("{}", answer.text);
//!     Ok(())
//! }
//! ```

/// Provider-agnostic LLM interface.
///
/// Concrete HTTP backends, a validated provider registry and a client that
/// fails over between a primary and a fallback provider.
pub mod llm;

/// Hierarchical configuration management.
///
/// Merges defaults, database overrides, the YAML file and environment
/// variables into one validated, atomically published configuration.
pub mod config;

/// Service restart orchestration for configuration changes.
pub mod services;

/// Environment constants and path utilities.
pub mod env;

// CLI module for command-line interface
pub mod cli;

// Re-export configuration types
pub use config::{ConfigurationError, ConfigurationLoader, ConfigurationManager, SystemConfiguration};

// Re-export LLM abstraction types
pub use llm::{LLMError, LLMProvider, LLMProviderClient, ProviderRegistry, StructuredResponse};
