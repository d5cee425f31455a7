use crate::llm::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
use crate::llm::types::{
    EmbeddingRequest, EmbeddingResponse, HealthStatus, LLMError, ModelDiscoveryResult,
    ProviderCapabilities, ProviderCategory, ProviderDescriptor, ProviderHealth,
    TextGenerationRequest, TextGenerationResponse,
};
use chrono::Utc;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Budget for the probe request issued by health checks
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Generic LLM provider that can be implemented by any backend
pub trait LLMProvider: Send + Sync {
    /// Shared per-instance state: identity, breaker, timeout
    fn core(&self) -> &ProviderCore;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Generate text for a single prompt
    ///
    /// Implementations route the backend call through
    /// [`ProviderCore::guard_generation`] so the breaker and timeout apply.
    fn generate_text(
        &self,
        request: TextGenerationRequest,
    ) -> BoxFuture<'_, Result<TextGenerationResponse, LLMError>>;

    /// Generate embeddings. Providers without embedding support keep the
    /// default, which fails without touching the network.
    fn generate_embeddings(
        &self,
        _request: EmbeddingRequest,
    ) -> BoxFuture<'_, Result<EmbeddingResponse, LLMError>> {
        let error = LLMError::NotSupported {
            provider: self.provider_id().to_string(),
            operation: "embeddings".to_string(),
        };
        Box::pin(async move { Err(error) })
    }

    /// List available models. Never fails; falls back to curated lists.
    fn discover_models(&self) -> BoxFuture<'_, ModelDiscoveryResult>;

    fn provider_id(&self) -> &str {
        &self.core().descriptor().provider_id
    }

    fn descriptor(&self) -> &ProviderDescriptor {
        self.core().descriptor()
    }

    fn circuit_state(&self) -> CircuitState {
        self.core().circuit_snapshot().state
    }

    /// Send a tiny prompt and report whether non-empty text came back
    fn test_connection(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let request = TextGenerationRequest::new("Hello")
                .with_max_tokens(5)
                .with_timeout(HEALTH_CHECK_TIMEOUT);
            match self.generate_text(request).await {
                Ok(response) => !response.text.trim().is_empty(),
                Err(e) => {
                    debug!("Connection test for {} failed: {}", self.provider_id(), e);
                    false
                }
            }
        })
    }

    /// Probe the backend. Reports failures in the result, never as an error.
    fn health_check(&self) -> BoxFuture<'_, ProviderHealth> {
        Box::pin(async move {
            let started = Instant::now();
            let request = TextGenerationRequest::new("ping")
                .with_max_tokens(5)
                .with_timeout(HEALTH_CHECK_TIMEOUT);
            let outcome = self.generate_text(request).await;
            let latency = started.elapsed();

            let (status, error) = match outcome {
                Ok(_) => (HealthStatus::Healthy, None),
                Err(e) if e.is_rate_limit() => (HealthStatus::Degraded, Some(e.to_string())),
                Err(e) => (HealthStatus::Unhealthy, Some(e.to_string())),
            };

            ProviderHealth {
                provider_id: self.provider_id().to_string(),
                status,
                circuit_state: self.circuit_state(),
                latency: Some(latency),
                error,
                checked_at: Utc::now(),
            }
        })
    }

    /// Release held resources
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// State every provider instance carries
#[derive(Debug)]
pub struct ProviderCore {
    descriptor: ProviderDescriptor,
    breaker: Mutex<CircuitBreaker>,
    timeout: Duration,
}

impl ProviderCore {
    pub fn new(
        descriptor: ProviderDescriptor,
        breaker_config: CircuitBreakerConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            breaker: Mutex::new(CircuitBreaker::new(breaker_config)),
            timeout,
        }
    }

    /// Core with the default breaker for the descriptor's category
    pub fn for_category(descriptor: ProviderDescriptor, timeout: Duration) -> Self {
        let config = CircuitBreakerConfig::for_category(descriptor.category);
        Self::new(descriptor, config, timeout)
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn provider_id(&self) -> &str {
        &self.descriptor.provider_id
    }

    pub fn category(&self) -> ProviderCategory {
        self.descriptor.category
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn circuit_snapshot(&self) -> CircuitSnapshot {
        self.breaker().snapshot_at(Instant::now())
    }

    pub fn record_success(&self) {
        self.breaker().record_success();
    }

    pub fn record_failure(&self) {
        self.breaker().record_failure();
    }

    /// Fail fast when the breaker is open
    pub fn ensure_available(&self) -> Result<(), LLMError> {
        if self.breaker().is_open() {
            return Err(LLMError::Unavailable {
                provider: self.provider_id().to_string(),
                message: "circuit breaker is open".to_string(),
            });
        }
        Ok(())
    }

    /// Run a backend call under the breaker and a timeout.
    ///
    /// The breaker is consulted before `call` is polled, so an open breaker
    /// means no network I/O happens at all.
    pub async fn guard<T, F>(&self, timeout: Option<Duration>, call: F) -> Result<T, LLMError>
    where
        F: Future<Output = Result<T, LLMError>>,
    {
        self.ensure_available()?;

        let budget = timeout.unwrap_or(self.timeout);
        match tokio::time::timeout(budget, call).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                if error.counts_against_breaker() {
                    self.record_failure();
                }
                warn!("{} call failed: {}", self.provider_id(), error);
                Err(error)
            }
            Err(_) => {
                self.record_failure();
                warn!("{} call timed out after {:?}", self.provider_id(), budget);
                Err(LLMError::Timeout {
                    provider: self.provider_id().to_string(),
                    timeout: budget,
                })
            }
        }
    }

    /// [`guard`](Self::guard) for text generation; blank text is a failure.
    pub async fn guard_generation<F>(
        &self,
        timeout: Option<Duration>,
        call: F,
    ) -> Result<TextGenerationResponse, LLMError>
    where
        F: Future<Output = Result<TextGenerationResponse, LLMError>>,
    {
        let provider = self.provider_id().to_string();
        self.guard(timeout, async move {
            let response = call.await?;
            if response.text.trim().is_empty() {
                return Err(LLMError::MalformedResponse {
                    provider,
                    message: "empty response text".to_string(),
                });
            }
            Ok(response)
        })
        .await
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        // Breaker state stays consistent even if a holder panicked
        self.breaker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{ProviderCategory, TokenUsage};
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    fn core(threshold: u32) -> ProviderCore {
        ProviderCore::new(
            ProviderDescriptor::new("test", "Test", ProviderCategory::Local),
            CircuitBreakerConfig {
                failure_threshold: threshold,
                recovery_timeout_seconds: 60,
            },
            Duration::from_secs(5),
        )
    }

    fn response(text: &str) -> TextGenerationResponse {
        TextGenerationResponse {
            request_id: Uuid::new_v4(),
            text: text.to_string(),
            finish_reason: None,
            token_usage: TokenUsage::default(),
            latency: Duration::ZERO,
            provider_id: "test".to_string(),
            model: "m".to_string(),
        }
    }

    fn network_error() -> LLMError {
        LLMError::Network {
            provider: "test".to_string(),
            message: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_breaker_skips_call() {
        let core = core(2);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let result: Result<(), _> = core
                .guard(None, async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(network_error())
                })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(core.circuit_snapshot().state, CircuitState::Open);

        let rejected: Result<(), _> = core
            .guard(None, async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(rejected.unwrap_err().is_unavailable());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let core = core(1);
        let result: Result<(), _> = core
            .guard(Some(Duration::from_millis(10)), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(LLMError::Timeout { .. })));
        assert_eq!(core.circuit_snapshot().state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_empty_generation_is_failure() {
        let core = core(3);
        let result = core
            .guard_generation(None, async { Ok(response("   ")) })
            .await;

        assert!(matches!(result, Err(LLMError::MalformedResponse { .. })));
        assert_eq!(core.circuit_snapshot().failures, 1);

        let ok = core
            .guard_generation(None, async { Ok(response("hi")) })
            .await
            .unwrap();
        assert_eq!(ok.text, "hi");
        assert_eq!(core.circuit_snapshot().failures, 0);
    }

    #[tokio::test]
    async fn test_config_errors_do_not_trip_breaker() {
        let core = core(1);
        let result: Result<(), _> = core
            .guard(None, async {
                Err(LLMError::NotSupported {
                    provider: "test".to_string(),
                    operation: "embeddings".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(core.circuit_snapshot().state, CircuitState::Closed);
    }
}
