//! Backends speaking the OpenAI chat completions protocol: OpenAI itself,
//! the OpenRouter gateway and a local LM Studio server.

use super::{HttpBackend, missing_field, resolved_base_url, resolved_timeout, token_count};
use crate::llm::circuit_breaker::CircuitBreakerConfig;
use crate::llm::provider::{LLMProvider, ProviderCore};
use crate::llm::registry::{ProviderRegistration, ProviderRegistry, RegistryError};
use crate::llm::types::{
    Capability, ConfigField, EmbeddingRequest, EmbeddingResponse, FieldType, LLMError,
    ModelDiscoveryResult, ModelSource, ProviderCapabilities, ProviderCategory,
    ProviderConfigSchema, ProviderDescriptor, ProviderSettings, TextGenerationRequest,
    TextGenerationResponse, TokenUsage,
};
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIFlavor {
    OpenAI,
    OpenRouter,
    LmStudio,
}

impl OpenAIFlavor {
    pub const ALL: [OpenAIFlavor; 3] = [
        OpenAIFlavor::OpenAI,
        OpenAIFlavor::OpenRouter,
        OpenAIFlavor::LmStudio,
    ];

    pub fn provider_id(self) -> &'static str {
        match self {
            OpenAIFlavor::OpenAI => "openai",
            OpenAIFlavor::OpenRouter => "openrouter",
            OpenAIFlavor::LmStudio => "lmstudio",
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            OpenAIFlavor::OpenAI => "OpenAI",
            OpenAIFlavor::OpenRouter => "OpenRouter",
            OpenAIFlavor::LmStudio => "LM Studio",
        }
    }

    fn category(self) -> ProviderCategory {
        match self {
            OpenAIFlavor::OpenAI => ProviderCategory::Cloud,
            OpenAIFlavor::OpenRouter => ProviderCategory::Gateway,
            OpenAIFlavor::LmStudio => ProviderCategory::Local,
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            OpenAIFlavor::OpenAI => "https://api.openai.com/v1",
            OpenAIFlavor::OpenRouter => "https://openrouter.ai/api/v1",
            OpenAIFlavor::LmStudio => "http://localhost:1234/v1",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            OpenAIFlavor::OpenAI => "gpt-4o-mini",
            OpenAIFlavor::OpenRouter => "openai/gpt-4o-mini",
            OpenAIFlavor::LmStudio => "local-model",
        }
    }

    fn default_embedding_model(self) -> Option<&'static str> {
        match self {
            OpenAIFlavor::OpenAI => Some("text-embedding-3-small"),
            OpenAIFlavor::OpenRouter => None,
            OpenAIFlavor::LmStudio => Some("text-embedding-nomic-embed-text-v1.5"),
        }
    }

    fn default_timeout_seconds(self) -> u64 {
        match self {
            OpenAIFlavor::LmStudio => 120,
            _ => 60,
        }
    }

    fn requires_api_key(self) -> bool {
        self != OpenAIFlavor::LmStudio
    }

    fn static_text_models(self) -> &'static [&'static str] {
        match self {
            OpenAIFlavor::OpenAI => &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"],
            OpenAIFlavor::OpenRouter => &[
                "openai/gpt-4o-mini",
                "anthropic/claude-3.5-sonnet",
                "meta-llama/llama-3.1-70b-instruct",
            ],
            OpenAIFlavor::LmStudio => &["local-model"],
        }
    }

    fn static_embedding_models(self) -> &'static [&'static str] {
        match self {
            OpenAIFlavor::OpenAI => &["text-embedding-3-small", "text-embedding-3-large"],
            OpenAIFlavor::OpenRouter => &[],
            OpenAIFlavor::LmStudio => &["text-embedding-nomic-embed-text-v1.5"],
        }
    }

    pub fn descriptor(self) -> ProviderDescriptor {
        ProviderDescriptor::new(self.provider_id(), self.display_name(), self.category())
    }

    pub fn capabilities(self) -> ProviderCapabilities {
        let mut capabilities = vec![
            Capability::TextGeneration,
            Capability::ModelDiscovery,
            Capability::StructuredOutput,
        ];
        if self.default_embedding_model().is_some() {
            capabilities.push(Capability::Embeddings);
        }
        if self != OpenAIFlavor::LmStudio {
            capabilities.push(Capability::FunctionCalling);
        }
        let context = match self {
            OpenAIFlavor::LmStudio => 8192,
            _ => 128_000,
        };
        ProviderCapabilities::new(capabilities, context)
    }

    pub fn config_schema(self) -> ProviderConfigSchema {
        let api_key = if self.requires_api_key() {
            ConfigField::required("api_key", FieldType::Secret, "API key")
        } else {
            ConfigField::optional("api_key", FieldType::Secret, "API key")
        };
        let mut fields = vec![
            api_key,
            ConfigField::optional("base_url", FieldType::Url, "API endpoint")
                .with_default(json!(self.default_base_url())),
            ConfigField::optional("model", FieldType::String, "Text generation model")
                .with_default(json!(self.default_model())),
            ConfigField::optional("timeout_seconds", FieldType::Integer, "Request timeout")
                .with_default(json!(self.default_timeout_seconds())),
            ConfigField::optional("temperature", FieldType::Float, "Sampling temperature"),
            ConfigField::optional("max_tokens", FieldType::Integer, "Maximum tokens to generate"),
        ];
        if let Some(embedding) = self.default_embedding_model() {
            fields.push(
                ConfigField::optional("embedding_model", FieldType::String, "Embedding model")
                    .with_default(json!(embedding)),
            );
        }
        ProviderConfigSchema::new(fields)
    }

    fn default_breaker(self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::for_category(self.category())
    }
}

pub fn register(registry: &ProviderRegistry) -> Result<(), RegistryError> {
    for flavor in OpenAIFlavor::ALL {
        registry.register(ProviderRegistration::new(
            flavor.descriptor(),
            flavor.capabilities(),
            flavor.config_schema(),
            Arc::new(move |settings: &ProviderSettings| {
                Ok(Arc::new(OpenAICompatibleProvider::new(flavor, settings)?)
                    as Arc<dyn LLMProvider>)
            }),
        ))?;
    }
    Ok(())
}

pub struct OpenAICompatibleProvider {
    flavor: OpenAIFlavor,
    core: ProviderCore,
    http: HttpBackend,
    api_key: Option<String>,
    model: String,
    embedding_model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAICompatibleProvider {
    pub fn new(flavor: OpenAIFlavor, settings: &ProviderSettings) -> Result<Self, LLMError> {
        let api_key = settings
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty());
        if flavor.requires_api_key() && api_key.is_none() {
            return Err(LLMError::InvalidConfig {
                provider: flavor.provider_id().to_string(),
                message: "api_key is required".to_string(),
            });
        }

        let timeout = resolved_timeout(settings, flavor.default_timeout_seconds());
        let base_url = resolved_base_url(settings, flavor.default_base_url());
        let http = HttpBackend::new(flavor.provider_id(), &base_url, timeout)?;
        let breaker = settings
            .circuit_breaker
            .unwrap_or_else(|| flavor.default_breaker());

        Ok(Self {
            flavor,
            core: ProviderCore::new(flavor.descriptor(), breaker, timeout),
            http,
            api_key,
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| flavor.default_model().to_string()),
            embedding_model: settings
                .embedding_model
                .clone()
                .or_else(|| flavor.default_embedding_model().map(str::to_string)),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    pub fn flavor(&self) -> OpenAIFlavor {
        self.flavor
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();
        if let Some(key) = &self.api_key {
            headers.push(("Authorization", format!("Bearer {}", key)));
        }
        if self.flavor == OpenAIFlavor::OpenRouter {
            headers.push(("HTTP-Referer", "https://github.com/docaiche/docaiche".to_string()));
            headers.push(("X-Title", "DocAIche".to_string()));
        }
        headers
    }

    fn chat_body(&self, request: &TextGenerationRequest, model: &str) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut body = json!({ "model": model, "messages": messages });
        if let Some(temperature) = request.temperature.or(self.temperature) {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(top_p) = request.top_p {
            body["top_p"] = json!(top_p);
        }
        if !request.stop_sequences.is_empty() {
            body["stop"] = json!(request.stop_sequences);
        }
        body
    }

    async fn call_chat(
        &self,
        request: TextGenerationRequest,
    ) -> Result<TextGenerationResponse, LLMError> {
        let started = Instant::now();
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = self.chat_body(&request, &model);
        let provider = self.flavor.provider_id();

        debug!("{} chat completion with model {}", provider, model);
        let value = self
            .http
            .post_json("chat/completions", &self.headers(), &body)
            .await?;

        let choice = value
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| missing_field(provider, "choices"))?;
        let text = choice
            .pointer("/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_field(provider, "choices[0].message.content"))?
            .to_string();
        let usage = value.get("usage").cloned().unwrap_or(Value::Null);

        Ok(TextGenerationResponse {
            request_id: request.id,
            text,
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            token_usage: TokenUsage::new(
                token_count(&usage, "prompt_tokens"),
                token_count(&usage, "completion_tokens"),
            ),
            latency: started.elapsed(),
            provider_id: provider.to_string(),
            model: value
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(&model)
                .to_string(),
        })
    }

    async fn call_embeddings(
        &self,
        request: EmbeddingRequest,
        model: String,
    ) -> Result<EmbeddingResponse, LLMError> {
        let started = Instant::now();
        let provider = self.flavor.provider_id();
        let body = json!({ "model": model, "input": request.texts });
        let value = self
            .http
            .post_json("embeddings", &self.headers(), &body)
            .await?;

        let data = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| missing_field(provider, "data"))?;
        let mut indexed: Vec<(u64, Vec<f32>)> = data
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let index = item
                    .get("index")
                    .and_then(Value::as_u64)
                    .unwrap_or(position as u64);
                let vector = item
                    .get("embedding")
                    .and_then(Value::as_array)
                    .map(|v| v.iter().filter_map(Value::as_f64).map(|f| f as f32).collect())
                    .unwrap_or_default();
                (index, vector)
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);

        let usage = value.get("usage").cloned().unwrap_or(Value::Null);
        Ok(EmbeddingResponse {
            embeddings: indexed.into_iter().map(|(_, v)| v).collect(),
            model,
            provider_id: provider.to_string(),
            token_usage: TokenUsage::new(token_count(&usage, "prompt_tokens"), 0),
            latency: started.elapsed(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, LLMError> {
        let value = self.http.get_json("models", &self.headers()).await?;
        let models = value
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| missing_field(self.flavor.provider_id(), "data"))?
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(models)
    }
}

impl LLMProvider for OpenAICompatibleProvider {
    fn core(&self) -> &ProviderCore {
        &self.core
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.flavor.capabilities()
    }

    fn generate_text(
        &self,
        request: TextGenerationRequest,
    ) -> BoxFuture<'_, Result<TextGenerationResponse, LLMError>> {
        Box::pin(async move {
            let timeout = request.timeout;
            self.core.guard_generation(timeout, self.call_chat(request)).await
        })
    }

    fn generate_embeddings(
        &self,
        request: EmbeddingRequest,
    ) -> BoxFuture<'_, Result<EmbeddingResponse, LLMError>> {
        Box::pin(async move {
            let Some(model) = request.model.clone().or_else(|| self.embedding_model.clone()) else {
                return Err(LLMError::NotSupported {
                    provider: self.flavor.provider_id().to_string(),
                    operation: "embeddings".to_string(),
                });
            };
            let timeout = request.timeout;
            self.core
                .guard(timeout, self.call_embeddings(request, model))
                .await
        })
    }

    fn discover_models(&self) -> BoxFuture<'_, ModelDiscoveryResult> {
        Box::pin(async move {
            let provider = self.flavor.provider_id();
            match self.list_models().await {
                Ok(models) => {
                    let (embedding_models, text_models): (Vec<String>, Vec<String>) =
                        models.into_iter().partition(|m| m.contains("embed"));
                    ModelDiscoveryResult {
                        provider_id: provider.to_string(),
                        text_models,
                        embedding_models,
                        source: ModelSource::Api,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("{} model discovery failed, using static list: {}", provider, e);
                    ModelDiscoveryResult::from_static(
                        provider,
                        self.flavor.static_text_models(),
                        self.flavor.static_embedding_models(),
                        ModelSource::StaticFallback,
                        Some(e.to_string()),
                    )
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(key: &str) -> ProviderSettings {
        ProviderSettings::default().with_api_key(key)
    }

    #[test]
    fn test_api_key_required_for_cloud() {
        let err = OpenAICompatibleProvider::new(OpenAIFlavor::OpenAI, &ProviderSettings::default());
        assert!(matches!(err, Err(LLMError::InvalidConfig { .. })));

        let local = OpenAICompatibleProvider::new(OpenAIFlavor::LmStudio, &ProviderSettings::default());
        assert!(local.is_ok());
    }

    #[test]
    fn test_flavor_defaults() {
        let provider =
            OpenAICompatibleProvider::new(OpenAIFlavor::OpenRouter, &settings("sk-or-test-key")).unwrap();
        assert_eq!(provider.provider_id(), "openrouter");
        assert_eq!(provider.descriptor().category, ProviderCategory::Gateway);
        assert!(!provider.capabilities().supports(Capability::Embeddings));

        let headers = provider.headers();
        assert!(headers.iter().any(|(name, _)| *name == "HTTP-Referer"));
        assert!(headers.iter().any(|(name, value)| *name == "Authorization"
            && value == "Bearer sk-or-test-key"));
    }

    #[test]
    fn test_chat_body_includes_system_message() {
        let provider =
            OpenAICompatibleProvider::new(OpenAIFlavor::OpenAI, &settings("sk-test-key-123")).unwrap();
        let mut request = TextGenerationRequest::new("question").with_max_tokens(10);
        request.system_prompt = Some("context".to_string());

        let body = provider.chat_body(&request, "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "question");
        assert_eq!(body["max_tokens"], 10);
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_schema_marks_key_as_secret() {
        let schema = OpenAIFlavor::OpenAI.config_schema();
        let field = schema.field("api_key").unwrap();
        assert!(field.required);
        assert_eq!(field.field_type, FieldType::Secret);
        assert!(!OpenAIFlavor::LmStudio.config_schema().field("api_key").unwrap().required);
    }
}
