//! Anthropic Messages API.

use super::{HttpBackend, missing_field, resolved_base_url, resolved_timeout, token_count};
use crate::llm::circuit_breaker::CircuitBreakerConfig;
use crate::llm::provider::{LLMProvider, ProviderCore};
use crate::llm::registry::{ProviderRegistration, ProviderRegistry, RegistryError};
use crate::llm::types::{
    Capability, ConfigField, FieldType, LLMError, ModelDiscoveryResult, ModelSource,
    ProviderCapabilities, ProviderCategory, ProviderConfigSchema, ProviderDescriptor,
    ProviderSettings, TextGenerationRequest, TextGenerationResponse, TokenUsage,
};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

pub const PROVIDER_ID: &str = "anthropic";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
pub const API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
/// The Messages API rejects requests without max_tokens
const DEFAULT_MAX_TOKENS: u32 = 1024;

const STATIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20241022",
    "claude-3-5-haiku-20241022",
    "claude-3-opus-20240229",
];

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor::new(PROVIDER_ID, "Anthropic", ProviderCategory::Cloud)
}

pub fn capabilities() -> ProviderCapabilities {
    ProviderCapabilities::new(
        [
            Capability::TextGeneration,
            Capability::ModelDiscovery,
            Capability::StructuredOutput,
            Capability::FunctionCalling,
        ],
        200_000,
    )
}

pub fn config_schema() -> ProviderConfigSchema {
    ProviderConfigSchema::new(vec![
        ConfigField::required("api_key", FieldType::Secret, "Anthropic API key"),
        ConfigField::optional("base_url", FieldType::Url, "API endpoint")
            .with_default(json!(DEFAULT_BASE_URL)),
        ConfigField::optional("model", FieldType::String, "Model")
            .with_default(json!(DEFAULT_MODEL)),
        ConfigField::optional("timeout_seconds", FieldType::Integer, "Request timeout")
            .with_default(json!(DEFAULT_TIMEOUT_SECONDS)),
        ConfigField::optional("temperature", FieldType::Float, "Sampling temperature"),
        ConfigField::optional("max_tokens", FieldType::Integer, "Maximum tokens to generate")
            .with_default(json!(DEFAULT_MAX_TOKENS)),
    ])
}

pub fn register(registry: &ProviderRegistry) -> Result<(), RegistryError> {
    registry.register(ProviderRegistration::new(
        descriptor(),
        capabilities(),
        config_schema(),
        Arc::new(|settings: &ProviderSettings| {
            Ok(Arc::new(AnthropicProvider::new(settings)?) as Arc<dyn LLMProvider>)
        }),
    ))
}

pub struct AnthropicProvider {
    core: ProviderCore,
    http: HttpBackend,
    api_key: String,
    model: String,
    temperature: Option<f32>,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, LLMError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| LLMError::InvalidConfig {
                provider: PROVIDER_ID.to_string(),
                message: "api_key is required".to_string(),
            })?;

        let timeout = resolved_timeout(settings, DEFAULT_TIMEOUT_SECONDS);
        let http = HttpBackend::new(
            PROVIDER_ID,
            &resolved_base_url(settings, DEFAULT_BASE_URL),
            timeout,
        )?;
        let breaker = settings
            .circuit_breaker
            .unwrap_or_else(CircuitBreakerConfig::external);

        Ok(Self {
            core: ProviderCore::new(descriptor(), breaker, timeout),
            http,
            api_key,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        })
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", API_VERSION.to_string()),
        ]
    }

    fn messages_body(&self, request: &TextGenerationRequest, model: &str) -> Value {
        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(self.max_tokens),
            "messages": [{ "role": "user", "content": request.prompt }],
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }
        if let Some(temperature) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(temperature);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if !request.stop_sequences.is_empty() {
            body["stop_sequences"] = json!(request.stop_sequences);
        }
        body
    }

    async fn call_messages(
        &self,
        request: TextGenerationRequest,
    ) -> Result<TextGenerationResponse, LLMError> {
        let started = Instant::now();
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = self.messages_body(&request, &model);

        debug!("Anthropic messages call with model {}", model);
        let value = self.http.post_json("messages", &self.headers(), &body).await?;

        let blocks = value
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| missing_field(PROVIDER_ID, "content"))?;
        let text: String = blocks
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        let usage = value.get("usage").cloned().unwrap_or(Value::Null);

        Ok(TextGenerationResponse {
            request_id: request.id,
            text,
            finish_reason: value
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            token_usage: TokenUsage::new(
                token_count(&usage, "input_tokens"),
                token_count(&usage, "output_tokens"),
            ),
            latency: started.elapsed(),
            provider_id: PROVIDER_ID.to_string(),
            model: value
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&model)
                .to_string(),
        })
    }
}

impl LLMProvider for AnthropicProvider {
    fn core(&self) -> &ProviderCore {
        &self.core
    }

    fn capabilities(&self) -> ProviderCapabilities {
        capabilities()
    }

    fn generate_text(
        &self,
        request: TextGenerationRequest,
    ) -> BoxFuture<'_, Result<TextGenerationResponse, LLMError>> {
        Box::pin(async move {
            let timeout = request.timeout;
            self.core
                .guard_generation(timeout, self.call_messages(request))
                .await
        })
    }

    fn discover_models(&self) -> BoxFuture<'_, ModelDiscoveryResult> {
        Box::pin(async move {
            ModelDiscoveryResult::from_static(PROVIDER_ID, STATIC_MODELS, &[], ModelSource::Static, None)
        })
    }
}
