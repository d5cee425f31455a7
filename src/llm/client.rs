//! Failover client over a primary and an optional fallback provider.

use crate::config::models::AIConfig;
use crate::llm::cache::{CacheManager, structured_cache_key};
use crate::llm::json_parser::{JsonParseError, JsonParser, StructuredResponse};
use crate::llm::provider::LLMProvider;
use crate::llm::registry::ProviderRegistry;
use crate::llm::types::{
    GenerationParams, HealthStatus, LLMError, ProviderHealth, ProviderStatus,
    TextGenerationRequest, TextGenerationResponse,
};
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Aggregate health of all providers known to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHealthReport {
    pub primary_provider: String,
    pub fallback_provider: Option<String>,
    pub failover_enabled: bool,
    pub providers: Vec<ProviderHealth>,
    pub statuses: BTreeMap<String, ProviderStatus>,
}

pub struct LLMProviderClient {
    primary_provider: String,
    fallback_provider: Option<String>,
    enable_failover: bool,
    providers: HashMap<String, Arc<dyn LLMProvider>>,
    statuses: DashMap<String, ProviderStatus>,
    last_health_check: Mutex<Instant>,
    health_check_interval: Duration,
    cache: Option<Arc<dyn CacheManager>>,
    cache_ttl: Duration,
}

impl LLMProviderClient {
    pub fn new(
        primary_provider: impl Into<String>,
        fallback_provider: Option<String>,
        enable_failover: bool,
        providers: Vec<Arc<dyn LLMProvider>>,
    ) -> Self {
        let providers: HashMap<String, Arc<dyn LLMProvider>> = providers
            .into_iter()
            .map(|p| (p.provider_id().to_string(), p))
            .collect();
        let statuses = providers
            .keys()
            .map(|name| (name.clone(), ProviderStatus::Unknown))
            .collect();

        Self {
            primary_provider: primary_provider.into(),
            fallback_provider,
            enable_failover,
            providers,
            statuses,
            last_health_check: Mutex::new(Instant::now()),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            cache: None,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Build every provider the AI configuration describes
    pub fn from_config(ai: &AIConfig, registry: &ProviderRegistry) -> Result<Self, LLMError> {
        let mut providers = Vec::new();
        for (name, settings) in ai.configured_providers() {
            match registry.get_or_create(&name, &settings) {
                Ok(provider) => providers.push(provider),
                Err(e) => error!("Failed to initialize provider {}: {}", name, e),
            }
        }
        if providers.is_empty() {
            return Err(LLMError::NoProvidersAvailable);
        }

        let client = Self::new(
            ai.primary_provider.clone(),
            ai.fallback_provider.clone(),
            ai.enable_failover,
            providers,
        )
        .with_health_check_interval(Duration::from_secs(ai.health_check_interval_seconds))
        .with_cache_ttl(Duration::from_secs(ai.cache_ttl_seconds));

        info!(
            "LLM client ready: primary={}, fallback={:?}, failover={}",
            client.primary_provider, client.fallback_provider, client.enable_failover
        );
        Ok(client)
    }

    pub fn with_cache(mut self, cache: Arc<dyn CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn primary_provider(&self) -> &str {
        &self.primary_provider
    }

    pub fn fallback_provider(&self) -> Option<&str> {
        self.fallback_provider.as_deref()
    }

    pub fn failover_enabled(&self) -> bool {
        self.enable_failover
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn LLMProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn provider_status(&self, name: &str) -> ProviderStatus {
        self.statuses
            .get(name)
            .map(|s| *s)
            .unwrap_or(ProviderStatus::Unknown)
    }

    pub fn provider_statuses(&self) -> BTreeMap<String, ProviderStatus> {
        self.statuses
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Constructed providers in the order a request tries them
    pub fn attempt_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        if self.providers.contains_key(&self.primary_provider) {
            order.push(self.primary_provider.clone());
        } else {
            warn!("Primary provider {} is not configured", self.primary_provider);
        }
        if self.enable_failover
            && let Some(fallback) = &self.fallback_provider
            && fallback != &self.primary_provider
        {
            if self.providers.contains_key(fallback) {
                order.push(fallback.clone());
            } else {
                warn!("Fallback provider {} is not configured", fallback);
            }
        }
        order
    }

    /// Generate a response and parse it into `T`.
    ///
    /// JSON problems are returned to the caller as they are: the provider
    /// answered, so they neither trigger failover nor mark it unhealthy.
    pub async fn generate_structured<T: StructuredResponse>(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<T, LLMError> {
        let cache_key = structured_cache_key(
            &self.primary_provider,
            prompt,
            T::schema_name(),
            &params.sorted(),
        );

        if let Some(hit) = self.cache_lookup::<T>(&cache_key).await {
            debug!("Cache hit for {}", T::schema_name());
            return Ok(hit);
        }

        let response = self.generate_text(prompt, params).await?;
        let parsed = parse_response::<T>(&response.text)?;

        self.cache_store(&cache_key, &parsed).await;
        Ok(parsed)
    }

    /// Generate raw text with failover
    pub async fn generate_text(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<TextGenerationResponse, LLMError> {
        let request = TextGenerationRequest::new(prompt).with_params(params);
        self.execute_with_failover(|provider| {
            let request = request.clone();
            async move { provider.generate_text(request).await }
        })
        .await
    }

    async fn execute_with_failover<T, F, Fut>(&self, operation: F) -> Result<T, LLMError>
    where
        F: Fn(Arc<dyn LLMProvider>) -> Fut,
        Fut: Future<Output = Result<T, LLMError>>,
    {
        self.maybe_run_health_sweep().await;

        let order = self.attempt_order();
        let mut last_error: Option<LLMError> = None;

        for (index, name) in order.iter().enumerate() {
            let Some(provider) = self.providers.get(name).cloned() else {
                continue;
            };

            // Always make one real attempt, even when every candidate looks unhealthy
            let is_last = index + 1 == order.len();
            if self.provider_status(name) == ProviderStatus::Unhealthy && !is_last {
                debug!("Skipping unhealthy provider {}", name);
                continue;
            }

            match operation(provider).await {
                Ok(value) => {
                    self.statuses.insert(name.clone(), ProviderStatus::Healthy);
                    return Ok(value);
                }
                Err(e) => {
                    let status = if e.is_rate_limit() {
                        ProviderStatus::RateLimited
                    } else {
                        ProviderStatus::Unhealthy
                    };
                    self.statuses.insert(name.clone(), status);
                    warn!("Provider {} failed ({}): {}", name, status, e);

                    if !self.enable_failover {
                        return Err(e);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(LLMError::NoProvidersAvailable))
    }

    async fn maybe_run_health_sweep(&self) {
        let due = {
            let mut last = self
                .last_health_check
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if last.elapsed() > self.health_check_interval {
                *last = Instant::now();
                true
            } else {
                false
            }
        };
        if due {
            self.check_all_providers_health().await;
        }
    }

    /// Health-check every provider concurrently and refresh statuses
    pub async fn check_all_providers_health(&self) -> Vec<ProviderHealth> {
        let checks = self.providers.values().map(|provider| provider.health_check());
        let results = join_all(checks).await;

        for health in &results {
            let status = match health.status {
                HealthStatus::Healthy => ProviderStatus::Healthy,
                HealthStatus::Degraded => ProviderStatus::RateLimited,
                _ => ProviderStatus::Unhealthy,
            };
            self.statuses.insert(health.provider_id.clone(), status);
        }
        results
    }

    pub async fn health_check(&self) -> ClientHealthReport {
        let mut providers = self.check_all_providers_health().await;
        providers.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));

        ClientHealthReport {
            primary_provider: self.primary_provider.clone(),
            fallback_provider: self.fallback_provider.clone(),
            failover_enabled: self.enable_failover,
            providers,
            statuses: self.provider_statuses(),
        }
    }

    pub async fn close(&self) {
        join_all(self.providers.values().map(|p| p.close())).await;
    }

    async fn cache_lookup<T: StructuredResponse>(&self, key: &str) -> Option<T> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(value)) => serde_json::from_value(value).ok(),
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed: {}", e);
                None
            }
        }
    }

    async fn cache_store<T: StructuredResponse>(&self, key: &str, value: &T) {
        let Some(cache) = &self.cache else {
            return;
        };
        let Ok(serialized) = serde_json::to_value(value) else {
            return;
        };
        if let Err(e) = cache.set(key, serialized, self.cache_ttl).await {
            warn!("Cache write failed: {}", e);
        }
    }
}

fn parse_response<T: StructuredResponse>(text: &str) -> Result<T, LLMError> {
    match JsonParser::parse_structured::<T>(text) {
        Ok(parsed) => Ok(parsed),
        Err(JsonParseError::NoJson) => match T::from_raw_text(text) {
            Some(value) => value.validate().map(|_| value).map_err(LLMError::JsonValidation),
            None => Err(LLMError::JsonParsing(format!(
                "no JSON object for {} in response",
                T::schema_name()
            ))),
        },
        Err(e @ JsonParseError::Validation { .. }) => Err(LLMError::JsonValidation(e.to_string())),
    }
}
