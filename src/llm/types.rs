use crate::llm::circuit_breaker::{CircuitBreakerConfig, CircuitState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Text generation request accepted by every provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGenerationRequest {
    pub id: Uuid,
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Vec<String>,
    /// Overrides the provider's configured timeout for this call only
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl TextGenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            system_prompt: None,
            model: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            stop_sequences: Vec::new(),
            timeout: None,
        }
    }

    /// Copy caller-supplied generation parameters onto the request
    pub fn with_params(mut self, params: &GenerationParams) -> Self {
        self.system_prompt = params.system_prompt.clone();
        self.model = params.model.clone();
        self.temperature = params.temperature;
        self.max_tokens = params.max_tokens;
        self.top_p = params.top_p;
        self.stop_sequences = params.stop_sequences.clone();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Generation parameters supplied by callers of the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GenerationParams {
    /// Parameters as a key-sorted map, used for stable cache keys
    pub fn sorted(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }
}

/// Text generation response from any provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextGenerationResponse {
    pub request_id: Uuid,
    pub text: String,
    pub finish_reason: Option<String>,
    pub token_usage: TokenUsage,
    pub latency: Duration,
    pub provider_id: String,
    pub model: String,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub model: Option<String>,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl EmbeddingRequest {
    pub fn new(texts: Vec<String>) -> Self {
        Self {
            texts,
            model: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub provider_id: String,
    pub token_usage: TokenUsage,
    pub latency: Duration,
}

/// Deployment category of a provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    Cloud,
    Local,
    Gateway,
    Specialized,
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderCategory::Cloud => "cloud",
            ProviderCategory::Local => "local",
            ProviderCategory::Gateway => "gateway",
            ProviderCategory::Specialized => "specialized",
        };
        f.write_str(name)
    }
}

/// Immutable identity of a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub provider_id: String,
    pub display_name: String,
    pub category: ProviderCategory,
}

impl ProviderDescriptor {
    pub fn new(
        provider_id: impl Into<String>,
        display_name: impl Into<String>,
        category: ProviderCategory,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            display_name: display_name.into(),
            category,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    TextGeneration,
    Embeddings,
    ModelDiscovery,
    StructuredOutput,
    Streaming,
    FunctionCalling,
}

/// Provider capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub capabilities: BTreeSet<Capability>,
    pub max_context_tokens: u64,
}

impl ProviderCapabilities {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>, max_context_tokens: u64) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            max_context_tokens,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Where a model list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    /// Live answer from the provider API
    Api,
    /// Provider has no listing endpoint; curated list
    Static,
    /// Listing endpoint failed; curated list used instead
    StaticFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDiscoveryResult {
    pub provider_id: String,
    pub text_models: Vec<String>,
    pub embedding_models: Vec<String>,
    pub source: ModelSource,
    pub error: Option<String>,
}

impl ModelDiscoveryResult {
    pub fn from_static(
        provider_id: &str,
        text_models: &[&str],
        embedding_models: &[&str],
        source: ModelSource,
        error: Option<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            text_models: text_models.iter().map(|m| m.to_string()).collect(),
            embedding_models: embedding_models.iter().map(|m| m.to_string()).collect(),
            source,
            error,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        self.source == ModelSource::Api
    }
}

/// Registry-level health of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Outcome of a single provider health check. Never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub status: HealthStatus,
    pub circuit_state: CircuitState,
    pub latency: Option<Duration>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Client-level failover status of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Healthy,
    Unhealthy,
    RateLimited,
    #[default]
    Unknown,
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderStatus::Healthy => "healthy",
            ProviderStatus::Unhealthy => "unhealthy",
            ProviderStatus::RateLimited => "rate_limited",
            ProviderStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Runtime configuration handed to a provider constructor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_seconds: Option<u64>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub additional_config: BTreeMap<String, Value>,
}

impl ProviderSettings {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Look up a field by its schema name
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "base_url" => self.base_url.clone().map(Value::String),
            "api_key" => self.api_key.clone().map(Value::String),
            "model" => self.model.clone().map(Value::String),
            "embedding_model" => self.embedding_model.clone().map(Value::String),
            "temperature" => self.temperature.map(|t| Value::from(t as f64)),
            "max_tokens" => self.max_tokens.map(Value::from),
            "timeout_seconds" => self.timeout_seconds.map(Value::from),
            other => self.additional_config.get(other).cloned(),
        }
    }

    /// Stable digest of these settings, used as an instance cache key
    pub fn config_hash(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(serialized.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Copy safe for logs and API output
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api_key.is_some() {
            copy.api_key = Some("***".to_string());
        }
        copy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Secret,
    Url,
    Integer,
    Float,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub description: String,
    pub default: Option<Value>,
}

impl ConfigField {
    pub fn required(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            description: description.to_string(),
            default: None,
        }
    }

    pub fn optional(name: &str, field_type: FieldType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Declarative description of the settings a provider accepts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfigSchema {
    pub fields: Vec<ConfigField>,
}

impl ProviderConfigSchema {
    pub fn new(fields: Vec<ConfigField>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&ConfigField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check that `settings` satisfies this schema
    pub fn validate_settings(&self, settings: &ProviderSettings) -> Result<(), String> {
        let mut problems = Vec::new();

        for field in &self.fields {
            let value = settings.field(&field.name);
            let present = match &value {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.trim().is_empty(),
                Some(_) => true,
            };

            if !present {
                if field.required && field.default.is_none() {
                    problems.push(format!("missing required field '{}'", field.name));
                }
                continue;
            }

            if field.field_type == FieldType::Url
                && let Some(Value::String(raw)) = &value
                && url::Url::parse(raw).is_err()
            {
                problems.push(format!("field '{}' is not a valid URL: {}", field.name, raw));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}

/// Errors produced by providers, the registry and the failover client
#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("[{provider}] provider error: {message}")]
    Provider { provider: String, message: String },
    #[error("[{provider}] authentication failed: {message}")]
    Authentication { provider: String, message: String },
    #[error("[{provider}] rate limit exceeded: {message}")]
    RateLimit {
        provider: String,
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("[{provider}] request timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
    #[error("[{provider}] provider unavailable: {message}")]
    Unavailable { provider: String, message: String },
    #[error("[{provider}] network error: {message}")]
    Network { provider: String, message: String },
    #[error("[{provider}] malformed response: {message}")]
    MalformedResponse { provider: String, message: String },
    #[error("[{provider}] upstream error (HTTP {status}): {message}")]
    Upstream {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("[{provider}] {operation} is not supported")]
    NotSupported { provider: String, operation: String },
    #[error("[{provider}] invalid configuration: {message}")]
    InvalidConfig { provider: String, message: String },
    #[error("JSON parsing failed: {0}")]
    JsonParsing(String),
    #[error("JSON validation failed: {0}")]
    JsonValidation(String),
    #[error("No providers available")]
    NoProvidersAvailable,
}

impl LLMError {
    pub fn provider(&self) -> Option<&str> {
        match self {
            LLMError::Provider { provider, .. }
            | LLMError::Authentication { provider, .. }
            | LLMError::RateLimit { provider, .. }
            | LLMError::Timeout { provider, .. }
            | LLMError::Unavailable { provider, .. }
            | LLMError::Network { provider, .. }
            | LLMError::MalformedResponse { provider, .. }
            | LLMError::Upstream { provider, .. }
            | LLMError::NotSupported { provider, .. }
            | LLMError::InvalidConfig { provider, .. } => Some(provider.as_str()),
            LLMError::JsonParsing(_)
            | LLMError::JsonValidation(_)
            | LLMError::NoProvidersAvailable => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LLMError::RateLimit { .. })
    }

    /// Circuit breaker rejected the call before any network I/O
    pub fn is_unavailable(&self) -> bool {
        matches!(self, LLMError::Unavailable { .. })
    }

    pub fn is_json_error(&self) -> bool {
        matches!(self, LLMError::JsonParsing(_) | LLMError::JsonValidation(_))
    }

    /// Whether this outcome of a completed call counts as a backend failure
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            LLMError::Provider { .. }
                | LLMError::Authentication { .. }
                | LLMError::RateLimit { .. }
                | LLMError::Timeout { .. }
                | LLMError::Network { .. }
                | LLMError::MalformedResponse { .. }
                | LLMError::Upstream { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_params_sorted_is_key_ordered() {
        let params = GenerationParams {
            temperature: Some(0.5),
            max_tokens: Some(200),
            model: Some("llama3".to_string()),
            ..Default::default()
        };

        let keys: Vec<String> = params.sorted().into_keys().collect();
        assert_eq!(keys, vec!["max_tokens", "model", "temperature"]);
    }

    #[test]
    fn test_config_hash_changes_with_settings() {
        let a = ProviderSettings::default().with_model("a");
        let b = ProviderSettings::default().with_model("b");

        assert_eq!(a.config_hash(), a.clone().config_hash());
        assert_ne!(a.config_hash(), b.config_hash());
        assert_eq!(a.config_hash().len(), 64);
    }

    #[test]
    fn test_schema_reports_missing_required_fields() {
        let schema = ProviderConfigSchema::new(vec![
            ConfigField::required("api_key", FieldType::Secret, "API key"),
            ConfigField::optional("base_url", FieldType::Url, "Endpoint"),
        ]);

        let err = schema
            .validate_settings(&ProviderSettings::default())
            .unwrap_err();
        assert!(err.contains("api_key"));

        let bad_url = ProviderSettings::default()
            .with_api_key("sk-test-key-123")
            .with_base_url("not a url");
        assert!(schema.validate_settings(&bad_url).unwrap_err().contains("base_url"));

        let ok = ProviderSettings::default().with_api_key("sk-test-key-123");
        assert!(schema.validate_settings(&ok).is_ok());
    }

    #[test]
    fn test_error_classification() {
        let rate = LLMError::RateLimit {
            provider: "openai".to_string(),
            message: "slow down".to_string(),
            retry_after: None,
        };
        assert!(rate.is_rate_limit());
        assert!(rate.counts_against_breaker());
        assert_eq!(rate.provider(), Some("openai"));

        let open = LLMError::Unavailable {
            provider: "ollama".to_string(),
            message: "circuit open".to_string(),
        };
        assert!(open.is_unavailable());
        assert!(!open.counts_against_breaker());

        assert!(LLMError::JsonParsing("x".to_string()).is_json_error());
        assert!(LLMError::NoProvidersAvailable.provider().is_none());
    }
}
