//! Tree operations for layered configuration.
//!
//! All layers are merged as `serde_json::Value` trees addressed by dotted
//! keys (`ai.openai.api_key`). The environment layer is driven by the
//! [`ENV_OVERRIDES`] table; each entry names the variable, the dotted key it
//! writes and how its text is converted.
//!
//! # Environment Variables
//! - `APP_ENVIRONMENT`, `APP_DEBUG`, `LOG_LEVEL`, `API_HOST`, `API_PORT`, `WORKERS`
//! - `WEAVIATE_URL`, `WEAVIATE_API_KEY`
//! - `GITHUB_TOKEN`
//! - `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `REDIS_DB`
//! - `AI_PRIMARY_PROVIDER`, `AI_FALLBACK_PROVIDER`, `AI_ENABLE_FAILOVER`
//! - `OLLAMA_ENDPOINT`, `AI_OLLAMA_MODEL`, `AI_OLLAMA_EMBEDDING_MODEL`
//! - `OPENAI_API_KEY`, `AI_OPENAI_MODEL`, `OPENAI_BASE_URL`
//! - `ANTHROPIC_API_KEY`, `AI_ANTHROPIC_MODEL`
//! - `OPENROUTER_API_KEY`, `AI_OPENROUTER_MODEL`
//! - `LMSTUDIO_ENDPOINT`
//! - `CONTEXT7_ENABLED`, `CONTEXT7_API_KEY`, `CONTEXT7_TTL_DEFAULT_DAYS`,
//!   `CONTEXT7_TTL_MIN_DAYS`, `CONTEXT7_TTL_MAX_DAYS`
//! - `ENRICHMENT_ENABLED`, `MCP_ENABLED`

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::env;
use tracing::{debug, warn};

/// How an environment variable's text becomes a tree value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvConverter {
    Str,
    Int,
    Float,
    Bool,
}

impl EnvConverter {
    pub fn convert(self, raw: &str) -> Result<Value, String> {
        let trimmed = raw.trim();
        match self {
            EnvConverter::Str => Ok(Value::String(raw.to_string())),
            EnvConverter::Int => trimmed
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| format!("'{}' is not an integer: {}", raw, e)),
            EnvConverter::Float => trimmed
                .parse::<f64>()
                .map(Value::from)
                .map_err(|e| format!("'{}' is not a number: {}", raw, e)),
            EnvConverter::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("'{}' is not 'true' or 'false'", raw)),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvOverride {
    pub env_var: &'static str,
    pub key: &'static str,
    pub converter: EnvConverter,
}

const fn entry(env_var: &'static str, key: &'static str, converter: EnvConverter) -> EnvOverride {
    EnvOverride {
        env_var,
        key,
        converter,
    }
}

use EnvConverter::{Bool, Int, Str};

pub const ENV_OVERRIDES: &[EnvOverride] = &[
    entry("APP_ENVIRONMENT", "app.environment", Str),
    entry("APP_DEBUG", "app.debug", Bool),
    entry("LOG_LEVEL", "app.log_level", Str),
    entry("API_HOST", "app.api_host", Str),
    entry("API_PORT", "app.api_port", Int),
    entry("WORKERS", "app.workers", Int),
    entry("WEAVIATE_URL", "weaviate.endpoint", Str),
    entry("WEAVIATE_API_KEY", "weaviate.api_key", Str),
    entry("GITHUB_TOKEN", "github.api_token", Str),
    entry("REDIS_HOST", "redis.host", Str),
    entry("REDIS_PORT", "redis.port", Int),
    entry("REDIS_PASSWORD", "redis.password", Str),
    entry("REDIS_DB", "redis.db", Int),
    entry("AI_PRIMARY_PROVIDER", "ai.primary_provider", Str),
    entry("AI_FALLBACK_PROVIDER", "ai.fallback_provider", Str),
    entry("AI_ENABLE_FAILOVER", "ai.enable_failover", Bool),
    entry("OLLAMA_ENDPOINT", "ai.ollama.base_url", Str),
    entry("AI_OLLAMA_MODEL", "ai.ollama.model", Str),
    entry("AI_OLLAMA_EMBEDDING_MODEL", "ai.ollama.embedding_model", Str),
    entry("OPENAI_API_KEY", "ai.openai.api_key", Str),
    entry("AI_OPENAI_MODEL", "ai.openai.model", Str),
    entry("OPENAI_BASE_URL", "ai.openai.base_url", Str),
    entry("ANTHROPIC_API_KEY", "ai.anthropic.api_key", Str),
    entry("AI_ANTHROPIC_MODEL", "ai.anthropic.model", Str),
    entry("OPENROUTER_API_KEY", "ai.openrouter.api_key", Str),
    entry("AI_OPENROUTER_MODEL", "ai.openrouter.model", Str),
    entry("LMSTUDIO_ENDPOINT", "ai.lmstudio.base_url", Str),
    entry("CONTEXT7_ENABLED", "context7.enabled", Bool),
    entry("CONTEXT7_API_KEY", "context7.api_key", Str),
    entry("CONTEXT7_TTL_DEFAULT_DAYS", "context7.ttl_default_days", Int),
    entry("CONTEXT7_TTL_MIN_DAYS", "context7.ttl_min_days", Int),
    entry("CONTEXT7_TTL_MAX_DAYS", "context7.ttl_max_days", Int),
    entry("ENRICHMENT_ENABLED", "enrichment.enabled", Bool),
    entry("MCP_ENABLED", "mcp.enabled", Bool),
];

/// Where environment variables are read from
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The live process environment, read at every load
    #[default]
    Process,
    /// A fixed set of variables
    Fixed(BTreeMap<String, String>),
}

impl EnvSource {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        EnvSource::Fixed(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<String> {
        match self {
            EnvSource::Process => env::var(name).ok(),
            EnvSource::Fixed(vars) => vars.get(name).cloned(),
        }
    }
}

/// Recursively merge `overlay` into `base`; overlay wins on leaves
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Write `value` at a dotted key, creating intermediate objects
pub fn set_nested(root: &mut Value, dotted_key: &str, value: Value) {
    let mut current = root;
    let mut parts = dotted_key.split('.').peekable();

    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };

        if parts.peek().is_none() {
            map.insert(part.to_string(), value);
            return;
        }
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

pub fn get_nested<'a>(root: &'a Value, dotted_key: &str) -> Option<&'a Value> {
    dotted_key
        .split('.')
        .try_fold(root, |node, part| node.as_object()?.get(part))
}

/// Database values are JSON when they parse as JSON, plain text otherwise
pub fn parse_stored_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Apply every set environment variable from the table.
///
/// Values that fail conversion are logged and skipped. Returns the dotted
/// keys that were written.
pub fn apply_env_overrides(root: &mut Value, env: &EnvSource) -> Vec<&'static str> {
    let mut applied = Vec::new();
    for rule in ENV_OVERRIDES {
        let Some(raw) = env.get(rule.env_var) else {
            continue;
        };
        match rule.converter.convert(&raw) {
            Ok(value) => {
                debug!("{} overrides {}", rule.env_var, rule.key);
                set_nested(root, rule.key, value);
                applied.push(rule.key);
            }
            Err(e) => warn!("Ignoring {}: {}", rule.env_var, e),
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{LLMProviderConfig, SystemConfiguration};
    use serde_json::json;

    #[test]
    fn test_deep_merge_keeps_siblings() {
        let mut base = json!({"app": {"debug": false, "workers": 4}, "redis": {"port": 6379}});
        deep_merge(&mut base, json!({"app": {"debug": true}}));

        assert_eq!(base["app"]["debug"], true);
        assert_eq!(base["app"]["workers"], 4);
        assert_eq!(base["redis"]["port"], 6379);
    }

    #[test]
    fn test_deep_merge_replaces_non_objects() {
        let mut base = json!({"ai": {"openai": null}});
        deep_merge(&mut base, json!({"ai": {"openai": {"model": "gpt-4o"}}}));
        assert_eq!(base["ai"]["openai"]["model"], "gpt-4o");
    }

    #[test]
    fn test_set_nested_creates_path() {
        let mut root = json!({"ai": {"openai": null}});
        set_nested(&mut root, "ai.openai.api_key", json!("sk-test"));
        set_nested(&mut root, "brand.new.key", json!(1));

        assert_eq!(get_nested(&root, "ai.openai.api_key"), Some(&json!("sk-test")));
        assert_eq!(get_nested(&root, "brand.new.key"), Some(&json!(1)));
        assert_eq!(get_nested(&root, "ai.missing"), None);
    }

    #[test]
    fn test_bool_converter_is_strict() {
        assert_eq!(Bool.convert("TRUE"), Ok(json!(true)));
        assert_eq!(Bool.convert("false"), Ok(json!(false)));
        assert!(Bool.convert("yes").is_err());
        assert!(Bool.convert("1").is_err());
        assert_eq!(Int.convert(" 42 "), Ok(json!(42)));
        assert!(Int.convert("4.2").is_err());
        assert_eq!(EnvConverter::Float.convert("0.5"), Ok(json!(0.5)));
    }

    #[test]
    fn test_unconvertible_env_values_skipped() {
        let mut root = json!({"app": {"debug": false, "workers": 4}});
        let env = EnvSource::from_pairs([("APP_DEBUG", "maybe"), ("WORKERS", "8")]);

        let applied = apply_env_overrides(&mut root, &env);
        assert_eq!(applied, vec!["app.workers"]);
        assert_eq!(root["app"]["debug"], false);
        assert_eq!(root["app"]["workers"], 8);
    }

    #[test]
    fn test_every_override_resolves_to_a_leaf() {
        let mut config = SystemConfiguration::default();
        for name in crate::config::models::KNOWN_PROVIDERS {
            if let Some(slot) = config.ai.provider_config_mut(name) {
                *slot = Some(LLMProviderConfig::default());
            }
        }
        let tree = serde_json::to_value(&config).unwrap();

        for rule in ENV_OVERRIDES {
            let leaf = get_nested(&tree, rule.key);
            assert!(leaf.is_some(), "{} -> {} does not exist", rule.env_var, rule.key);
            assert!(!leaf.unwrap().is_object(), "{} is not a leaf", rule.key);
        }
    }

    #[test]
    fn test_stored_values() {
        assert_eq!(parse_stored_value("5"), json!(5));
        assert_eq!(parse_stored_value("true"), json!(true));
        assert_eq!(parse_stored_value("{\"a\": 1}"), json!({"a": 1}));
        assert_eq!(parse_stored_value("plain text"), json!("plain text"));
    }
}
