//! Concrete provider backends and the HTTP plumbing they share.

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::{OpenAICompatibleProvider, OpenAIFlavor};

use crate::llm::registry::{ProviderRegistry, RegistryError};
use crate::llm::types::{LLMError, ProviderSettings};
use reqwest::header::RETRY_AFTER;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const ERROR_BODY_LIMIT: usize = 500;

/// Register every built-in provider
pub fn register_builtin_providers(registry: &ProviderRegistry) -> Result<(), RegistryError> {
    ollama::register(registry)?;
    openai::register(registry)?;
    anthropic::register(registry)?;
    Ok(())
}

/// JSON-over-HTTP client bound to one provider's endpoint
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    provider_id: String,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(provider_id: &str, base_url: &str, timeout: Duration) -> Result<Self, LLMError> {
        url::Url::parse(base_url).map_err(|e| LLMError::InvalidConfig {
            provider: provider_id.to_string(),
            message: format!("invalid base URL '{}': {}", base_url, e),
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| LLMError::InvalidConfig {
                provider: provider_id.to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            provider_id: provider_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json(&self, path: &str, headers: &[(&str, String)]) -> Result<Value, LLMError> {
        let mut builder = self.client.get(self.url(path));
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        self.send(builder).await
    }

    pub async fn post_json(
        &self,
        path: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, LLMError> {
        let mut builder = self.client.post(self.url(path)).json(body);
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        self.send(builder).await
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, LLMError> {
        let response = builder
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            debug!("{} returned HTTP {}: {}", self.provider_id, status, body);
            return Err(classify_status(
                &self.provider_id,
                status.as_u16(),
                &body,
                retry_after,
            ));
        }

        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if body.trim().is_empty() {
            return Err(LLMError::MalformedResponse {
                provider: self.provider_id.clone(),
                message: "empty response body".to_string(),
            });
        }
        serde_json::from_str(&body).map_err(|e| LLMError::MalformedResponse {
            provider: self.provider_id.clone(),
            message: format!("response is not JSON: {}", e),
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> LLMError {
        if error.is_timeout() {
            LLMError::Timeout {
                provider: self.provider_id.clone(),
                timeout: self.timeout,
            }
        } else {
            LLMError::Network {
                provider: self.provider_id.clone(),
                message: error.to_string(),
            }
        }
    }
}

/// Map a non-success HTTP status to an error kind
pub fn classify_status(
    provider: &str,
    status: u16,
    body: &str,
    retry_after: Option<Duration>,
) -> LLMError {
    let provider = provider.to_string();
    let message: String = body.chars().take(ERROR_BODY_LIMIT).collect();

    match status {
        401 | 403 => LLMError::Authentication { provider, message },
        429 => LLMError::RateLimit {
            provider,
            message,
            retry_after,
        },
        500..=599 => LLMError::Upstream {
            provider,
            status,
            message,
        },
        _ => LLMError::Provider {
            provider,
            message: format!("HTTP {}: {}", status, message),
        },
    }
}

fn resolved_base_url(settings: &ProviderSettings, default: &str) -> String {
    settings
        .base_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or(default)
        .to_string()
}

fn resolved_timeout(settings: &ProviderSettings, default_seconds: u64) -> Duration {
    Duration::from_secs(settings.timeout_seconds.unwrap_or(default_seconds).max(1))
}

fn token_count(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(Value::as_u64).unwrap_or(0)
}

fn missing_field(provider: &str, field: &str) -> LLMError {
    LLMError::MalformedResponse {
        provider: provider.to_string(),
        message: format!("response missing '{}'", field),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status("openai", 401, "bad key", None),
            LLMError::Authentication { .. }
        ));
        assert!(matches!(
            classify_status("openai", 403, "", None),
            LLMError::Authentication { .. }
        ));
        match classify_status("openai", 429, "slow", Some(Duration::from_secs(3))) {
            LLMError::RateLimit { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(3)))
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(
            classify_status("openai", 503, "down", None),
            LLMError::Upstream { status: 503, .. }
        ));
        assert!(matches!(
            classify_status("openai", 404, "missing", None),
            LLMError::Provider { .. }
        ));
    }

    #[test]
    fn test_backend_url_joining() {
        let backend =
            HttpBackend::new("ollama", "http://localhost:11434/", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.url("/api/tags"), "http://localhost:11434/api/tags");
        assert_eq!(backend.url("api/generate"), "http://localhost:11434/api/generate");

        let err = HttpBackend::new("ollama", "not a url", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, LLMError::InvalidConfig { .. }));
    }

    #[test]
    fn test_long_error_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match classify_status("anthropic", 500, &body, None) {
            LLMError::Upstream { message, .. } => assert_eq!(message.len(), ERROR_BODY_LIMIT),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
