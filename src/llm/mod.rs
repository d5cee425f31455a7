pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod json_parser;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod types;

pub use cache::{CacheManager, InMemoryCache};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::{ClientHealthReport, LLMProviderClient};
pub use json_parser::{JsonParseError, JsonParser, StructuredResponse, TextResponse};
pub use provider::{LLMProvider, ProviderCore};
pub use registry::{ProviderRegistration, ProviderRegistry, RegistryError};
pub use types::*;
