//! Tests against a real local Ollama server. Run with a server listening on
//! `OLLAMA_ENDPOINT` (default `http://localhost:11434`).

use docaiche::llm::{
    GenerationParams, LLMProvider, LLMProviderClient, ProviderRegistry, ProviderSettings,
    TextResponse,
};
use test_tag::tag;

fn live_settings() -> ProviderSettings {
    let mut settings = ProviderSettings::default();
    if let Ok(endpoint) = std::env::var("OLLAMA_ENDPOINT") {
        settings = settings.with_base_url(endpoint);
    }
    if let Ok(model) = std::env::var("AI_OLLAMA_MODEL") {
        settings = settings.with_model(model);
    }
    settings
}

#[tokio::test]
#[tag(ollama)]
async fn test_live_ollama_connection_and_discovery() {
    let registry = ProviderRegistry::with_builtin_providers();
    let result = registry.test_provider("ollama", &live_settings(), true).await;

    assert!(result.success, "Ollama test failed: {:?}", result.error);
    let models = result.models.expect("discovery requested");
    assert!(models.is_authoritative());
}

#[tokio::test]
#[tag(ollama)]
async fn test_live_structured_generation() {
    let registry = ProviderRegistry::with_builtin_providers();
    let provider = registry.create_provider("ollama", &live_settings()).unwrap();
    assert!(provider.test_connection().await);

    let client = LLMProviderClient::new("ollama", None, false, vec![provider]);
    let params = GenerationParams {
        system_prompt: Some("Reply only with JSON of the form {\"text\": \"...\"}.".to_string()),
        max_tokens: Some(64),
        ..Default::default()
    };
    let response: TextResponse = client
        .generate_structured("Say hello in one word.", &params)
        .await
        .unwrap();

    assert!(!response.text.trim().is_empty());
    client.close().await;
}
