//! Ollama local model server.

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
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub const PROVIDER_ID: &str = "ollama";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

const STATIC_TEXT_MODELS: &[&str] = &["llama3.2", "llama3.1:8b", "mistral", "qwen2.5", "phi3"];
const STATIC_EMBEDDING_MODELS: &[&str] = &["nomic-embed-text", "mxbai-embed-large"];

pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor::new(PROVIDER_ID, "Ollama", ProviderCategory::Local)
}

pub fn capabilities() -> ProviderCapabilities {
    ProviderCapabilities::new(
        [
            Capability::TextGeneration,
            Capability::Embeddings,
            Capability::ModelDiscovery,
            Capability::StructuredOutput,
        ],
        8192,
    )
}

pub fn config_schema() -> ProviderConfigSchema {
    ProviderConfigSchema::new(vec![
        ConfigField::optional("base_url", FieldType::Url, "Ollama server endpoint")
            .with_default(json!(DEFAULT_BASE_URL)),
        ConfigField::optional("model", FieldType::String, "Text generation model")
            .with_default(json!(DEFAULT_MODEL)),
        ConfigField::optional("embedding_model", FieldType::String, "Embedding model")
            .with_default(json!(DEFAULT_EMBEDDING_MODEL)),
        ConfigField::optional("timeout_seconds", FieldType::Integer, "Request timeout")
            .with_default(json!(DEFAULT_TIMEOUT_SECONDS)),
        ConfigField::optional("temperature", FieldType::Float, "Sampling temperature"),
        ConfigField::optional("max_tokens", FieldType::Integer, "Maximum tokens to generate"),
    ])
}

pub fn register(registry: &ProviderRegistry) -> Result<(), RegistryError> {
    registry.register(ProviderRegistration::new(
        descriptor(),
        capabilities(),
        config_schema(),
        Arc::new(|settings: &ProviderSettings| {
            Ok(Arc::new(OllamaProvider::new(settings)?) as Arc<dyn LLMProvider>)
        }),
    ))
}

pub struct OllamaProvider {
    core: ProviderCore,
    http: HttpBackend,
    model: String,
    embedding_model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OllamaProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, LLMError> {
        let timeout = resolved_timeout(settings, DEFAULT_TIMEOUT_SECONDS);
        let base_url = resolved_base_url(settings, DEFAULT_BASE_URL);
        let http = HttpBackend::new(PROVIDER_ID, &base_url, timeout)?;
        let breaker = settings.circuit_breaker.unwrap_or_else(CircuitBreakerConfig::local);

        Ok(Self {
            core: ProviderCore::new(descriptor(), breaker, timeout),
            http,
            model: settings.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            embedding_model: settings
                .embedding_model
                .clone()
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }

    fn generate_body(&self, request: &TextGenerationRequest, model: &str) -> Value {
        let mut options = Map::new();
        if let Some(temperature) = request.temperature.or(self.temperature) {
            options.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens.or(self.max_tokens) {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if let Some(top_p) = request.top_p {
            options.insert("top_p".to_string(), json!(top_p));
        }
        if !request.stop_sequences.is_empty() {
            options.insert("stop".to_string(), json!(request.stop_sequences));
        }

        let mut body = json!({
            "model": model,
            "prompt": request.prompt,
            "stream": false,
            "options": options,
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }
        body
    }

    async fn call_generate(
        &self,
        request: TextGenerationRequest,
    ) -> Result<TextGenerationResponse, LLMError> {
        let started = Instant::now();
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let body = self.generate_body(&request, &model);

        debug!("Ollama generate with model {}", model);
        let value = self.http.post_json("api/generate", &[], &body).await?;

        let text = value
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_field(PROVIDER_ID, "response"))?
            .to_string();

        Ok(TextGenerationResponse {
            request_id: request.id,
            text,
            finish_reason: value
                .get("done_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            token_usage: TokenUsage::new(
                token_count(&value, "prompt_eval_count"),
                token_count(&value, "eval_count"),
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

    async fn call_embeddings(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, LLMError> {
        let started = Instant::now();
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.embedding_model.clone());

        // One request per text; the endpoint takes a single prompt
        let mut embeddings = Vec::with_capacity(request.texts.len());
        for text in &request.texts {
            let body = json!({ "model": model, "prompt": text });
            let value = self.http.post_json("api/embeddings", &[], &body).await?;
            let vector = value
                .get("embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| missing_field(PROVIDER_ID, "embedding"))?
                .iter()
                .filter_map(Value::as_f64)
                .map(|v| v as f32)
                .collect();
            embeddings.push(vector);
        }

        Ok(EmbeddingResponse {
            embeddings,
            model,
            provider_id: PROVIDER_ID.to_string(),
            token_usage: TokenUsage::default(),
            latency: started.elapsed(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, LLMError> {
        let value = self.http.get_json("api/tags", &[]).await?;
        let models = value
            .get("models")
            .and_then(Value::as_array)
            .ok_or_else(|| missing_field(PROVIDER_ID, "models"))?
            .iter()
            .filter_map(|m| m.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        Ok(models)
    }
}

impl LLMProvider for OllamaProvider {
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
                .guard_generation(timeout, self.call_generate(request))
                .await
        })
    }

    fn generate_embeddings(
        &self,
        request: EmbeddingRequest,
    ) -> BoxFuture<'_, Result<EmbeddingResponse, LLMError>> {
        Box::pin(async move {
            let timeout = request.timeout;
            self.core.guard(timeout, self.call_embeddings(request)).await
        })
    }

    fn discover_models(&self) -> BoxFuture<'_, ModelDiscoveryResult> {
        Box::pin(async move {
            match self.list_models().await {
                Ok(models) => {
                    let (embedding_models, text_models): (Vec<String>, Vec<String>) =
                        models.into_iter().partition(|m| m.contains("embed"));
                    ModelDiscoveryResult {
                        provider_id: PROVIDER_ID.to_string(),
                        text_models,
                        embedding_models,
                        source: ModelSource::Api,
                        error: None,
                    }
                }
                Err(e) => {
                    warn!("Ollama model discovery failed, using static list: {}", e);
                    ModelDiscoveryResult::from_static(
                        PROVIDER_ID,
                        STATIC_TEXT_MODELS,
                        STATIC_EMBEDDING_MODELS,
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

    #[test]
    fn test_generate_body_options() {
        let provider = OllamaProvider::new(&ProviderSettings {
            temperature: Some(0.2),
            ..Default::default()
        })
        .unwrap();

        let mut request = TextGenerationRequest::new("hi").with_max_tokens(50);
        request.system_prompt = Some("be brief".to_string());
        request.stop_sequences = vec!["END".to_string()];

        let body = provider.generate_body(&request, "llama3.2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["options"]["num_predict"], 50);
        assert_eq!(body["options"]["stop"][0], "END");
        assert!(body["options"]["temperature"].as_f64().unwrap() > 0.19);
    }

    #[test]
    fn test_defaults_applied() {
        let provider = OllamaProvider::new(&ProviderSettings::default()).unwrap();
        assert_eq!(provider.model, DEFAULT_MODEL);
        assert_eq!(provider.http.base_url(), DEFAULT_BASE_URL);
        assert_eq!(provider.provider_id(), "ollama");
        assert!(provider.capabilities().supports(Capability::Embeddings));
    }

    #[test]
    fn test_schema_accepts_empty_settings() {
        assert!(config_schema()
            .validate_settings(&ProviderSettings::default())
            .is_ok());
    }
}
