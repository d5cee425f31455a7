//! Required secrets per environment.
//!
//! Production refuses to start without them. Development and testing get
//! deterministic placeholders so local stacks come up without real keys.

use crate::config::models::SystemConfiguration;
use crate::config::{ConfigurationError, Result};
use tracing::warn;

/// Cloud and gateway providers need a key once they are selected
const KEYED_PROVIDERS: &[&str] = &["openai", "anthropic", "openrouter"];

/// `${VAR}` left behind by a deployment template that was never filled in
pub fn is_unresolved_placeholder(value: &str) -> bool {
    let value = value.trim();
    value.len() > 3
        && value.starts_with("${")
        && value.ends_with('}')
        && value[2..value.len() - 1]
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn is_missing(value: Option<&String>) -> bool {
    match value {
        None => true,
        Some(v) => v.trim().is_empty() || is_unresolved_placeholder(v),
    }
}

pub fn placeholder_for(key: &str) -> String {
    format!("dev-placeholder-{}", key.replace('.', "-"))
}

/// Dotted keys of secrets this configuration requires but lacks
pub fn missing_secrets(config: &SystemConfiguration) -> Vec<String> {
    let mut missing = Vec::new();

    for name in config.ai.selected_providers() {
        if !KEYED_PROVIDERS.contains(&name) {
            continue;
        }
        let key = config.ai.provider_config(name).and_then(|c| c.api_key.as_ref());
        if is_missing(key) {
            missing.push(format!("ai.{}.api_key", name));
        }
    }

    if is_missing(config.github.api_token.as_ref()) {
        missing.push("github.api_token".to_string());
    }

    if config.context7.enabled && is_missing(config.context7.api_key.as_ref()) {
        missing.push("context7.api_key".to_string());
    }

    missing
}

/// Enforce secrets for the configured environment.
///
/// Returns the keys that were filled with placeholders.
pub fn apply_secret_policy(config: &mut SystemConfiguration) -> Result<Vec<String>> {
    let missing = missing_secrets(config);
    if missing.is_empty() {
        return Ok(missing);
    }

    if config.app.environment.is_production() {
        return Err(ConfigurationError::MissingSecrets(missing));
    }

    for key in &missing {
        let placeholder = Some(placeholder_for(key));
        match key.as_str() {
            "github.api_token" => config.github.api_token = placeholder,
            "context7.api_key" => config.context7.api_key = placeholder,
            provider_key => {
                let provider = provider_key
                    .strip_prefix("ai.")
                    .and_then(|rest| rest.strip_suffix(".api_key"))
                    .unwrap_or_default();
                if let Some(slot) = config.ai.provider_config_mut(provider) {
                    slot.get_or_insert_with(Default::default).api_key = placeholder;
                }
            }
        }
        warn!(
            "Secret {} not set; using placeholder for {} environment",
            key, config.app.environment
        );
    }

    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{Environment, LLMProviderConfig};

    fn production() -> SystemConfiguration {
        let mut config = SystemConfiguration::default();
        config.app.environment = Environment::Production;
        config
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(is_unresolved_placeholder("${OPENAI_API_KEY}"));
        assert!(!is_unresolved_placeholder("sk-real-value"));
        assert!(!is_unresolved_placeholder("${}"));
        assert!(!is_unresolved_placeholder("${lower}"));
    }

    #[test]
    fn test_production_requires_secrets() {
        let mut config = production();
        config.ai.fallback_provider = Some("openai".to_string());
        config.ai.openai = Some(LLMProviderConfig {
            api_key: Some("${OPENAI_API_KEY}".to_string()),
            ..Default::default()
        });

        match apply_secret_policy(&mut config) {
            Err(ConfigurationError::MissingSecrets(keys)) => {
                assert_eq!(keys, vec!["ai.openai.api_key", "github.api_token"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_production_with_secrets_passes() {
        let mut config = production();
        config.github.api_token = Some("ghp_realistic_token".to_string());
        assert!(apply_secret_policy(&mut config).unwrap().is_empty());
    }

    #[test]
    fn test_development_fills_placeholders() {
        let mut config = SystemConfiguration::default();
        config.ai.primary_provider = "anthropic".to_string();
        config.context7.enabled = true;

        let filled = apply_secret_policy(&mut config).unwrap();
        assert_eq!(filled.len(), 3);
        assert_eq!(
            config.ai.anthropic.unwrap().api_key.as_deref(),
            Some("dev-placeholder-ai-anthropic-api_key")
        );
        assert_eq!(
            config.github.api_token.as_deref(),
            Some("dev-placeholder-github-api_token")
        );
        assert!(config.context7.api_key.is_some());
    }

    #[test]
    fn test_local_providers_need_no_key() {
        let mut config = production();
        config.github.api_token = Some("ghp_realistic_token".to_string());
        config.ai.fallback_provider = Some("lmstudio".to_string());
        assert!(missing_secrets(&config).is_empty());
    }
}
