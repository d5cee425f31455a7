//! Typed configuration sections with defaults and bounds.

use crate::config::{ConfigurationError, Result};
use crate::llm::types::ProviderSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Provider ids the AI section may select
pub const KNOWN_PROVIDERS: &[&str] = &["ollama", "openai", "anthropic", "openrouter", "lmstudio"];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "warning", "error"];
const MIN_SECRET_LENGTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Testing,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Testing => "testing",
        };
        f.write_str(name)
    }
}

/// Complete, validated configuration snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfiguration {
    pub app: AppConfig,
    pub content: ContentConfig,
    pub weaviate: WeaviateConfig,
    pub github: GitHubConfig,
    pub scraping: ScrapingConfig,
    pub redis: RedisConfig,
    pub ai: AIConfig,
    pub enrichment: EnrichmentConfig,
    pub context7: Context7Config,
    pub mcp: McpConfig,
}

impl SystemConfiguration {
    /// Deserialize a merged tree. Does not validate.
    pub fn from_tree(tree: Value) -> Result<Self> {
        let mut config: SystemConfiguration = serde_json::from_value(tree)
            .map_err(|e| ConfigurationError::Deserialize(e.to_string()))?;
        config.ai.ensure_selected_providers();
        Ok(config)
    }

    /// Default values as a tree, the bottom layer of every merge
    pub fn defaults_tree() -> Value {
        serde_json::to_value(SystemConfiguration::default()).unwrap_or(Value::Null)
    }

    pub fn validate(&self) -> Result<()> {
        let mut v = Validator::default();
        self.app.validate(&mut v);
        self.content.validate(&mut v);
        self.weaviate.validate(&mut v);
        self.github.validate(&mut v);
        self.scraping.validate(&mut v);
        self.redis.validate(&mut v);
        self.ai.validate(&mut v);
        self.enrichment.validate(&mut v);
        self.context7.validate(&mut v);
        self.mcp.validate(&mut v);
        v.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub debug: bool,
    pub log_level: String,
    pub api_host: String,
    pub api_port: u16,
    pub web_port: u16,
    pub workers: u32,
    pub data_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            debug: false,
            log_level: "info".to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 4000,
            web_port: 8080,
            workers: 4,
            data_dir: "./data".to_string(),
        }
    }
}

impl AppConfig {
    fn validate(&self, v: &mut Validator) {
        v.range("app.workers", self.workers, 1, 16);
        v.range("app.api_port", self.api_port, 1, u16::MAX);
        v.range("app.web_port", self.web_port, 1, u16::MAX);
        v.not_blank("app.api_host", &self.api_host);
        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            v.push(format!(
                "app.log_level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            ));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub chunk_size_default: u32,
    pub chunk_size_max: u32,
    pub chunk_overlap: u32,
    pub quality_threshold: f64,
    pub freshness_days: u32,
    pub max_document_size_mb: u32,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            chunk_size_default: 1000,
            chunk_size_max: 4000,
            chunk_overlap: 100,
            quality_threshold: 0.3,
            freshness_days: 30,
            max_document_size_mb: 10,
        }
    }
}

impl ContentConfig {
    fn validate(&self, v: &mut Validator) {
        v.range("content.chunk_size_default", self.chunk_size_default, 100, 10_000);
        v.range("content.chunk_size_max", self.chunk_size_max, 100, 20_000);
        v.range("content.quality_threshold", self.quality_threshold, 0.0, 1.0);
        v.range("content.freshness_days", self.freshness_days, 1, 365);
        v.range("content.max_document_size_mb", self.max_document_size_mb, 1, 500);
        if self.chunk_size_default > self.chunk_size_max {
            v.push("content.chunk_size_default must not exceed content.chunk_size_max".to_string());
        }
        if self.chunk_overlap >= self.chunk_size_default {
            v.push("content.chunk_overlap must be smaller than content.chunk_size_default".to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaviateConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub class_prefix: String,
    pub timeout_seconds: u64,
}

impl Default for WeaviateConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://weaviate:8080".to_string(),
            api_key: None,
            class_prefix: "DocAIche".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl WeaviateConfig {
    fn validate(&self, v: &mut Validator) {
        v.url("weaviate.endpoint", &self.endpoint);
        v.secret("weaviate.api_key", self.api_key.as_deref());
        v.range("weaviate.timeout_seconds", self.timeout_seconds, 1, 300);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub rate_limit_buffer: u32,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: "https://api.github.com".to_string(),
            timeout_seconds: 30,
            max_retries: 3,
            rate_limit_buffer: 100,
        }
    }
}

impl GitHubConfig {
    fn validate(&self, v: &mut Validator) {
        v.url("github.base_url", &self.base_url);
        v.secret("github.api_token", self.api_token.as_deref());
        v.range("github.timeout_seconds", self.timeout_seconds, 1, 300);
        v.range("github.max_retries", self.max_retries, 0, 10);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_concurrent_requests: u32,
    pub rate_limit_delay_seconds: f64,
    pub max_retries: u32,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            user_agent: "DocAIche/1.0 (+https://github.com/docaiche/docaiche)".to_string(),
            timeout_seconds: 30,
            max_concurrent_requests: 5,
            rate_limit_delay_seconds: 1.0,
            max_retries: 3,
        }
    }
}

impl ScrapingConfig {
    fn validate(&self, v: &mut Validator) {
        v.not_blank("scraping.user_agent", &self.user_agent);
        v.range("scraping.timeout_seconds", self.timeout_seconds, 1, 300);
        v.range("scraping.max_concurrent_requests", self.max_concurrent_requests, 1, 50);
        v.range("scraping.rate_limit_delay_seconds", self.rate_limit_delay_seconds, 0.0, 60.0);
        v.range("scraping.max_retries", self.max_retries, 0, 10);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: u32,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
    pub ssl: bool,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "redis".to_string(),
            port: 6379,
            password: None,
            db: 0,
            max_connections: 20,
            connection_timeout_seconds: 5,
            ssl: false,
        }
    }
}

impl RedisConfig {
    fn validate(&self, v: &mut Validator) {
        v.not_blank("redis.host", &self.host);
        v.range("redis.port", self.port, 1, u16::MAX);
        v.range("redis.db", self.db, 0, 15);
        v.range("redis.max_connections", self.max_connections, 1, 1000);
        v.range("redis.connection_timeout_seconds", self.connection_timeout_seconds, 1, 60);
    }
}

/// Settings for one LLM provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMProviderConfig {
    #[serde(alias = "endpoint")]
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub embedding_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_seconds: Option<u64>,
}

impl LLMProviderConfig {
    fn validate(&self, name: &str, v: &mut Validator) {
        if let Some(url) = &self.base_url {
            v.url(&format!("ai.{}.base_url", name), url);
        }
        v.secret(&format!("ai.{}.api_key", name), self.api_key.as_deref());
        if let Some(t) = self.temperature {
            v.range(&format!("ai.{}.temperature", name), t, 0.0, 2.0);
        }
        if let Some(m) = self.max_tokens {
            v.range(&format!("ai.{}.max_tokens", name), m, 1, 200_000);
        }
        if let Some(s) = self.timeout_seconds {
            v.range(&format!("ai.{}.timeout_seconds", name), s, 1, 600);
        }
    }

    pub fn to_settings(&self, defaults: &AIConfig) -> ProviderSettings {
        ProviderSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            embedding_model: self.embedding_model.clone(),
            temperature: self.temperature.or(Some(defaults.temperature)),
            max_tokens: self.max_tokens.or(Some(defaults.max_tokens)),
            timeout_seconds: self.timeout_seconds,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AIConfig {
    pub primary_provider: String,
    pub fallback_provider: Option<String>,
    pub enable_failover: bool,
    pub cache_ttl_seconds: u64,
    pub health_check_interval_seconds: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub ollama: Option<LLMProviderConfig>,
    pub openai: Option<LLMProviderConfig>,
    pub anthropic: Option<LLMProviderConfig>,
    pub openrouter: Option<LLMProviderConfig>,
    pub lmstudio: Option<LLMProviderConfig>,
}

impl Default for AIConfig {
    fn default() -> Self {
        Self {
            primary_provider: "ollama".to_string(),
            fallback_provider: None,
            enable_failover: true,
            cache_ttl_seconds: 3600,
            health_check_interval_seconds: 60,
            temperature: 0.7,
            max_tokens: 4096,
            ollama: Some(LLMProviderConfig::default()),
            openai: None,
            anthropic: None,
            openrouter: None,
            lmstudio: None,
        }
    }
}

impl AIConfig {
    pub fn provider_config(&self, name: &str) -> Option<&LLMProviderConfig> {
        match name {
            "ollama" => self.ollama.as_ref(),
            "openai" => self.openai.as_ref(),
            "anthropic" => self.anthropic.as_ref(),
            "openrouter" => self.openrouter.as_ref(),
            "lmstudio" => self.lmstudio.as_ref(),
            _ => None,
        }
    }

    pub fn provider_config_mut(&mut self, name: &str) -> Option<&mut Option<LLMProviderConfig>> {
        match name {
            "ollama" => Some(&mut self.ollama),
            "openai" => Some(&mut self.openai),
            "anthropic" => Some(&mut self.anthropic),
            "openrouter" => Some(&mut self.openrouter),
            "lmstudio" => Some(&mut self.lmstudio),
            _ => None,
        }
    }

    /// Provider ids selected as primary or fallback
    pub fn selected_providers(&self) -> Vec<&str> {
        let mut selected = vec![self.primary_provider.as_str()];
        if let Some(fallback) = self.fallback_provider.as_deref()
            && fallback != self.primary_provider
        {
            selected.push(fallback);
        }
        selected
    }

    /// Every selected provider gets a section, even if the file had none
    pub fn ensure_selected_providers(&mut self) {
        let selected: Vec<String> = self.selected_providers().iter().map(|s| s.to_string()).collect();
        for name in selected {
            if let Some(slot) = self.provider_config_mut(&name)
                && slot.is_none()
            {
                *slot = Some(LLMProviderConfig::default());
            }
        }
    }

    /// Settings for every provider that has a section, in a fixed order
    pub fn configured_providers(&self) -> Vec<(String, ProviderSettings)> {
        KNOWN_PROVIDERS
            .iter()
            .filter_map(|name| {
                self.provider_config(name)
                    .map(|section| (name.to_string(), section.to_settings(self)))
            })
            .collect()
    }

    fn validate(&self, v: &mut Validator) {
        if !KNOWN_PROVIDERS.contains(&self.primary_provider.as_str()) {
            v.push(format!(
                "ai.primary_provider '{}' is not one of {}",
                self.primary_provider,
                KNOWN_PROVIDERS.join(", ")
            ));
        }
        if let Some(fallback) = &self.fallback_provider
            && !KNOWN_PROVIDERS.contains(&fallback.as_str())
        {
            v.push(format!(
                "ai.fallback_provider '{}' is not one of {}",
                fallback,
                KNOWN_PROVIDERS.join(", ")
            ));
        }
        v.range("ai.temperature", self.temperature, 0.0, 2.0);
        v.range("ai.max_tokens", self.max_tokens, 1, 200_000);
        v.range("ai.cache_ttl_seconds", self.cache_ttl_seconds, 0, 604_800);
        v.range("ai.health_check_interval_seconds", self.health_check_interval_seconds, 1, 3600);

        for name in KNOWN_PROVIDERS {
            if let Some(section) = self.provider_config(name) {
                section.validate(name, v);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub max_concurrent_tasks: u32,
    pub task_timeout_seconds: u64,
    pub retry_delay_seconds: u64,
    pub batch_size: u32,
    pub min_confidence: f64,
    pub lookback_days: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_tasks: 4,
            task_timeout_seconds: 300,
            retry_delay_seconds: 60,
            batch_size: 10,
            min_confidence: 0.7,
            lookback_days: 7,
        }
    }
}

impl EnrichmentConfig {
    fn validate(&self, v: &mut Validator) {
        v.range("enrichment.max_concurrent_tasks", self.max_concurrent_tasks, 1, 32);
        v.range("enrichment.task_timeout_seconds", self.task_timeout_seconds, 1, 3600);
        v.range("enrichment.batch_size", self.batch_size, 1, 1000);
        v.range("enrichment.min_confidence", self.min_confidence, 0.0, 1.0);
        v.range("enrichment.lookback_days", self.lookback_days, 1, 365);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context7Config {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: String,
    pub ttl_default_days: u32,
    pub ttl_min_days: u32,
    pub ttl_max_days: u32,
    pub timeout_seconds: u64,
}

impl Default for Context7Config {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            base_url: "https://context7.com/api".to_string(),
            ttl_default_days: 7,
            ttl_min_days: 1,
            ttl_max_days: 90,
            timeout_seconds: 30,
        }
    }
}

impl Context7Config {
    fn validate(&self, v: &mut Validator) {
        v.url("context7.base_url", &self.base_url);
        v.secret("context7.api_key", self.api_key.as_deref());
        v.range("context7.ttl_min_days", self.ttl_min_days, 1, 365);
        v.range("context7.ttl_max_days", self.ttl_max_days, 1, 365);
        v.range("context7.timeout_seconds", self.timeout_seconds, 1, 300);
        if !(self.ttl_min_days <= self.ttl_default_days && self.ttl_default_days <= self.ttl_max_days) {
            v.push(format!(
                "context7 TTLs must satisfy min <= default <= max, got {} / {} / {}",
                self.ttl_min_days, self.ttl_default_days, self.ttl_max_days
            ));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub enabled: bool,
    pub server_name: String,
    pub transport: String,
    pub max_results: u32,
    pub timeout_seconds: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            server_name: "docaiche".to_string(),
            transport: "stdio".to_string(),
            max_results: 10,
            timeout_seconds: 30,
        }
    }
}

impl McpConfig {
    fn validate(&self, v: &mut Validator) {
        if !matches!(self.transport.as_str(), "stdio" | "http") {
            v.push(format!("mcp.transport must be 'stdio' or 'http', got '{}'", self.transport));
        }
        v.not_blank("mcp.server_name", &self.server_name);
        v.range("mcp.max_results", self.max_results, 1, 100);
        v.range("mcp.timeout_seconds", self.timeout_seconds, 1, 300);
    }
}

/// Accumulates every violation so one load reports them all
#[derive(Debug, Default)]
struct Validator {
    errors: Vec<String>,
}

impl Validator {
    fn push(&mut self, message: String) {
        self.errors.push(message);
    }

    fn range<T: PartialOrd + fmt::Display>(&mut self, key: &str, value: T, min: T, max: T) {
        if value < min || value > max {
            self.push(format!("{} must be between {} and {}, got {}", key, min, max, value));
        }
    }

    fn not_blank(&mut self, key: &str, value: &str) {
        if value.trim().is_empty() {
            self.push(format!("{} must not be empty", key));
        }
    }

    fn url(&mut self, key: &str, value: &str) {
        if let Err(e) = url::Url::parse(value) {
            self.push(format!("{} is not a valid URL ({}): {}", key, e, value));
        }
    }

    /// Secrets are optional, but a present one must look real. Blank values
    /// count as missing and are left to the secret policy.
    fn secret(&mut self, key: &str, value: Option<&str>) {
        if let Some(secret) = value
            && !secret.trim().is_empty()
            && !crate::config::secrets::is_unresolved_placeholder(secret)
            && secret.len() < MIN_SECRET_LENGTH
        {
            self.push(format!("{} is shorter than {} characters", key, MIN_SECRET_LENGTH));
        }
    }

    fn finish(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_valid() {
        let config = SystemConfiguration::default();
        config.validate().unwrap();
        assert_eq!(config.app.environment, Environment::Development);
        assert_eq!(config.ai.primary_provider, "ollama");
    }

    #[test]
    fn test_workers_out_of_range() {
        let mut config = SystemConfiguration::default();
        config.app.workers = 99;
        match config.validate() {
            Err(ConfigurationError::Validation(errors)) => {
                assert_eq!(errors.len(), 1);
                assert!(errors[0].contains("app.workers"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_all_violations_reported() {
        let mut config = SystemConfiguration::default();
        config.redis.db = 42;
        config.weaviate.endpoint = "::nope::".to_string();
        config.context7.ttl_default_days = 500;
        config.github.api_token = Some("short".to_string());

        let Err(ConfigurationError::Validation(errors)) = config.validate() else {
            panic!("expected validation failure");
        };
        assert!(errors.iter().any(|e| e.contains("redis.db")));
        assert!(errors.iter().any(|e| e.contains("weaviate.endpoint")));
        assert!(errors.iter().any(|e| e.contains("context7 TTLs")));
        assert!(errors.iter().any(|e| e.contains("github.api_token")));
    }

    #[test]
    fn test_blank_secret_is_not_too_short() {
        let mut config = SystemConfiguration::default();
        config.github.api_token = Some(String::new());
        config.context7.api_key = Some("   ".to_string());
        config.validate().unwrap();

        config.github.api_token = Some("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_tree_fills_defaults() {
        let config = SystemConfiguration::from_tree(json!({
            "app": { "debug": true },
            "redis": { "port": 6380 }
        }))
        .unwrap();

        assert!(config.app.debug);
        assert_eq!(config.app.workers, 4);
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.host, "redis");
    }

    #[test]
    fn test_wrong_types_fail_deserialization() {
        let result = SystemConfiguration::from_tree(json!({ "app": { "workers": "many" } }));
        assert!(matches!(result, Err(ConfigurationError::Deserialize(_))));

        let result = SystemConfiguration::from_tree(json!({ "app": { "environment": "staging" } }));
        assert!(result.is_err());
    }

    #[test]
    fn test_selected_providers_always_constructed() {
        let config = SystemConfiguration::from_tree(json!({
            "ai": {
                "primary_provider": "anthropic",
                "fallback_provider": "openai",
                "ollama": null,
                "lmstudio": { "endpoint": "http://localhost:1234/v1" }
            }
        }))
        .unwrap();

        let names: Vec<String> = config
            .ai
            .configured_providers()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["openai", "anthropic", "lmstudio"]);
        assert_eq!(
            config.ai.lmstudio.unwrap().base_url.as_deref(),
            Some("http://localhost:1234/v1")
        );
    }

    #[test]
    fn test_provider_settings_inherit_ai_defaults() {
        let ai = AIConfig {
            temperature: 0.2,
            ..Default::default()
        };
        let section = LLMProviderConfig {
            max_tokens: Some(64),
            ..Default::default()
        };
        let settings = section.to_settings(&ai);
        assert_eq!(settings.temperature, Some(0.2));
        assert_eq!(settings.max_tokens, Some(64));
    }

    #[test]
    fn test_unknown_primary_provider_rejected() {
        let mut config = SystemConfiguration::default();
        config.ai.primary_provider = "mystery".to_string();
        assert!(config.validate().is_err());
    }
}
