use crate::llm::provider::LLMProvider;
use crate::llm::providers;
use crate::llm::types::{
    Capability, FieldType, HealthStatus, LLMError, ModelDiscoveryResult, ProviderCapabilities,
    ProviderCategory, ProviderConfigSchema, ProviderDescriptor, ProviderHealth, ProviderSettings,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub type ProviderFactory =
    Arc<dyn Fn(&ProviderSettings) -> Result<Arc<dyn LLMProvider>, LLMError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid registration for '{provider}': {reason}")]
    InvalidRegistration { provider: String, reason: String },
    #[error("Provider '{0}' is already registered")]
    Duplicate(String),
}

/// Everything the registry knows about a provider type
#[derive(Clone)]
pub struct ProviderRegistration {
    pub descriptor: ProviderDescriptor,
    pub capabilities: ProviderCapabilities,
    pub config_schema: ProviderConfigSchema,
    pub factory: ProviderFactory,
}

impl ProviderRegistration {
    pub fn new(
        descriptor: ProviderDescriptor,
        capabilities: ProviderCapabilities,
        config_schema: ProviderConfigSchema,
        factory: ProviderFactory,
    ) -> Self {
        Self {
            descriptor,
            capabilities,
            config_schema,
            factory,
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let id = &self.descriptor.provider_id;
        let invalid = |reason: &str| RegistryError::InvalidRegistration {
            provider: id.clone(),
            reason: reason.to_string(),
        };

        let mut chars = id.chars();
        let well_formed = chars.next().is_some_and(|c| c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !well_formed {
            return Err(invalid(
                "provider id must be lowercase alphanumeric and start with a letter",
            ));
        }
        if self.descriptor.display_name.trim().is_empty() {
            return Err(invalid("display name must not be empty"));
        }
        if !self.capabilities.supports(Capability::TextGeneration)
            && !self.capabilities.supports(Capability::Embeddings)
        {
            return Err(invalid("provider must support text generation or embeddings"));
        }

        let mut seen = HashSet::new();
        for field in &self.config_schema.fields {
            if field.name.trim().is_empty() {
                return Err(invalid("config schema contains an unnamed field"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(invalid(&format!("duplicate config field '{}'", field.name)));
            }
        }

        let remote = matches!(
            self.descriptor.category,
            ProviderCategory::Cloud | ProviderCategory::Gateway
        );
        let has_secret_key = self
            .config_schema
            .field("api_key")
            .is_some_and(|f| f.field_type == FieldType::Secret);
        if remote && !has_secret_key {
            return Err(invalid("remote providers must declare a secret 'api_key' field"));
        }

        Ok(())
    }
}

/// Last recorded health for a provider type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_checked: None,
            last_error: None,
        }
    }
}

/// Serializable listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub descriptor: ProviderDescriptor,
    pub capabilities: ProviderCapabilities,
    pub config_schema: ProviderConfigSchema,
    pub health: HealthRecord,
}

/// Result of exercising a provider with throwaway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderTestResult {
    pub provider_id: String,
    pub success: bool,
    pub latency: Option<Duration>,
    pub error: Option<String>,
    pub capabilities: Option<ProviderCapabilities>,
    pub models: Option<ModelDiscoveryResult>,
}

/// Catalog of provider types and cache of live instances
pub struct ProviderRegistry {
    registrations: DashMap<String, ProviderRegistration>,
    instances: DashMap<(String, String), Arc<dyn LLMProvider>>,
    health: DashMap<String, HealthRecord>,
}

static GLOBAL_REGISTRY: OnceLock<ProviderRegistry> = OnceLock::new();

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            registrations: DashMap::new(),
            instances: DashMap::new(),
            health: DashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in providers
    pub fn with_builtin_providers() -> Self {
        let registry = Self::new();
        if let Err(e) = providers::register_builtin_providers(&registry) {
            warn!("Failed to register built-in provider: {}", e);
        }
        registry
    }

    /// Process-wide registry, built on first use
    pub fn global() -> &'static ProviderRegistry {
        GLOBAL_REGISTRY.get_or_init(Self::with_builtin_providers)
    }

    pub fn register(&self, registration: ProviderRegistration) -> Result<(), RegistryError> {
        registration.validate()?;

        let id = registration.descriptor.provider_id.clone();
        match self.registrations.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RegistryError::Duplicate(id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(registration);
                self.health.entry(id.clone()).or_default();
                debug!("Registered provider {}", id);
                Ok(())
            }
        }
    }

    pub fn is_registered(&self, provider_id: &str) -> bool {
        self.registrations.contains_key(provider_id)
    }

    pub fn registration(&self, provider_id: &str) -> Option<ProviderRegistration> {
        self.registrations.get(provider_id).map(|r| r.clone())
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registrations.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        self.filtered(|_| true)
    }

    pub fn get_providers_by_capability(&self, capability: Capability) -> Vec<ProviderInfo> {
        self.filtered(|r| r.capabilities.supports(capability))
    }

    pub fn get_providers_by_category(&self, category: ProviderCategory) -> Vec<ProviderInfo> {
        self.filtered(|r| r.descriptor.category == category)
    }

    fn filtered<F>(&self, predicate: F) -> Vec<ProviderInfo>
    where
        F: Fn(&ProviderRegistration) -> bool,
    {
        let mut infos: Vec<ProviderInfo> = self
            .registrations
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| ProviderInfo {
                descriptor: entry.descriptor.clone(),
                capabilities: entry.capabilities.clone(),
                config_schema: entry.config_schema.clone(),
                health: self.health_record(entry.key()),
            })
            .collect();
        infos.sort_by(|a, b| a.descriptor.provider_id.cmp(&b.descriptor.provider_id));
        infos
    }

    /// Build a fresh, uncached instance
    pub fn create_provider(
        &self,
        provider_id: &str,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn LLMProvider>, LLMError> {
        let registration = self
            .registration(provider_id)
            .ok_or_else(|| LLMError::InvalidConfig {
                provider: provider_id.to_string(),
                message: "provider is not registered".to_string(),
            })?;

        registration
            .config_schema
            .validate_settings(settings)
            .map_err(|message| LLMError::InvalidConfig {
                provider: provider_id.to_string(),
                message,
            })?;

        (registration.factory)(settings)
    }

    /// Instance for these exact settings, built once and then reused
    pub fn get_or_create(
        &self,
        provider_id: &str,
        settings: &ProviderSettings,
    ) -> Result<Arc<dyn LLMProvider>, LLMError> {
        let key = (provider_id.to_string(), settings.config_hash());
        if let Some(existing) = self.instances.get(&key) {
            return Ok(existing.clone());
        }

        let created = self.create_provider(provider_id, settings)?;
        let instance = self.instances.entry(key).or_insert(created).clone();
        Ok(instance)
    }

    pub fn cached_instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Drop cached instances of one provider type
    pub fn evict(&self, provider_id: &str) {
        self.instances.retain(|(id, _), _| id != provider_id);
    }

    pub fn health_record(&self, provider_id: &str) -> HealthRecord {
        self.health
            .get(provider_id)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn record_health(&self, health: &ProviderHealth) {
        self.health.insert(
            health.provider_id.clone(),
            HealthRecord {
                status: health.status,
                last_checked: Some(health.checked_at),
                last_error: health.error.clone(),
            },
        );
    }

    /// Health check through the cached instance; the outcome is recorded
    pub async fn check_provider_health(
        &self,
        provider_id: &str,
        settings: &ProviderSettings,
    ) -> ProviderHealth {
        let health = match self.get_or_create(provider_id, settings) {
            Ok(provider) => provider.health_check().await,
            Err(e) => ProviderHealth {
                provider_id: provider_id.to_string(),
                status: HealthStatus::Unhealthy,
                circuit_state: Default::default(),
                latency: None,
                error: Some(e.to_string()),
                checked_at: Utc::now(),
            },
        };
        self.record_health(&health);
        info!("Provider {} health: {}", provider_id, health.status);
        health
    }

    /// Exercise a provider with candidate settings without caching it
    pub async fn test_provider(
        &self,
        provider_id: &str,
        settings: &ProviderSettings,
        discover: bool,
    ) -> ProviderTestResult {
        let provider = match self.create_provider(provider_id, settings) {
            Ok(provider) => provider,
            Err(e) => {
                return ProviderTestResult {
                    provider_id: provider_id.to_string(),
                    success: false,
                    latency: None,
                    error: Some(e.to_string()),
                    capabilities: self.registration(provider_id).map(|r| r.capabilities),
                    models: None,
                };
            }
        };

        let started = Instant::now();
        let success = provider.test_connection().await;
        let latency = started.elapsed();
        let models = if discover {
            Some(provider.discover_models().await)
        } else {
            None
        };
        provider.close().await;

        ProviderTestResult {
            provider_id: provider_id.to_string(),
            success,
            latency: Some(latency),
            error: (!success).then(|| "connection test failed".to_string()),
            capabilities: Some(provider.capabilities()),
            models,
        }
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ConfigField;

    fn dummy_factory() -> ProviderFactory {
        Arc::new(|_settings: &ProviderSettings| {
            Err(LLMError::NotSupported {
                provider: "dummy".to_string(),
                operation: "construction".to_string(),
            })
        })
    }

    fn registration(id: &str, category: ProviderCategory, fields: Vec<ConfigField>) -> ProviderRegistration {
        ProviderRegistration::new(
            ProviderDescriptor::new(id, "Dummy", category),
            ProviderCapabilities::new([Capability::TextGeneration], 4096),
            ProviderConfigSchema::new(fields),
            dummy_factory(),
        )
    }

    #[test]
    fn test_builtin_providers_registered() {
        let registry = ProviderRegistry::with_builtin_providers();
        assert_eq!(
            registry.provider_ids(),
            vec!["anthropic", "lmstudio", "ollama", "openai", "openrouter"]
        );

        let embedders: Vec<String> = registry
            .get_providers_by_capability(Capability::Embeddings)
            .into_iter()
            .map(|p| p.descriptor.provider_id)
            .collect();
        assert_eq!(embedders, vec!["lmstudio", "ollama", "openai"]);

        let local = registry.get_providers_by_category(ProviderCategory::Local);
        assert_eq!(local.len(), 2);
    }

    #[test]
    fn test_rejects_invalid_registrations() {
        let registry = ProviderRegistry::new();

        let bad_id = registration("Bad-Id", ProviderCategory::Local, vec![]);
        assert!(matches!(
            registry.register(bad_id),
            Err(RegistryError::InvalidRegistration { .. })
        ));

        let cloud_without_key = registration("cloudy", ProviderCategory::Cloud, vec![]);
        assert!(registry.register(cloud_without_key).is_err());

        let duplicate_fields = registration(
            "dupes",
            ProviderCategory::Local,
            vec![
                ConfigField::optional("model", FieldType::String, "a"),
                ConfigField::optional("model", FieldType::String, "b"),
            ],
        );
        assert!(registry.register(duplicate_fields).is_err());

        let mut no_capability = registration("blind", ProviderCategory::Local, vec![]);
        no_capability.capabilities = ProviderCapabilities::new([Capability::Streaming], 0);
        assert!(registry.register(no_capability).is_err());

        assert!(registry.provider_ids().is_empty());
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = ProviderRegistry::new();
        registry
            .register(registration("dummy", ProviderCategory::Local, vec![]))
            .unwrap();
        assert_eq!(
            registry.register(registration("dummy", ProviderCategory::Local, vec![])),
            Err(RegistryError::Duplicate("dummy".to_string()))
        );
    }

    #[test]
    fn test_instances_cached_by_settings() {
        let registry = ProviderRegistry::with_builtin_providers();
        let a = ProviderSettings::default().with_model("llama3.2");
        let b = ProviderSettings::default().with_model("mistral");

        let first = registry.get_or_create("ollama", &a).unwrap();
        let again = registry.get_or_create("ollama", &a).unwrap();
        let other = registry.get_or_create("ollama", &b).unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.cached_instance_count(), 2);

        registry.evict("ollama");
        assert_eq!(registry.cached_instance_count(), 0);
    }

    #[test]
    fn test_create_validates_settings() {
        let registry = ProviderRegistry::with_builtin_providers();

        let missing_key = registry.create_provider("openai", &ProviderSettings::default());
        assert!(matches!(missing_key, Err(LLMError::InvalidConfig { .. })));

        let unknown = registry.create_provider("nope", &ProviderSettings::default());
        assert!(unknown.is_err());
    }

    #[tokio::test]
    async fn test_provider_reports_construction_failure() {
        let registry = ProviderRegistry::with_builtin_providers();
        let result = registry
            .test_provider("anthropic", &ProviderSettings::default(), false)
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("api_key"));
        assert_eq!(registry.cached_instance_count(), 0);
    }

    #[test]
    fn test_unknown_health_by_default() {
        let registry = ProviderRegistry::with_builtin_providers();
        assert_eq!(registry.health_record("ollama").status, HealthStatus::Unknown);
    }
}
