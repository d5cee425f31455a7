use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, thiserror::Error)]
#[error("cache error: {0}")]
pub struct CacheError(pub String);

/// Key-value store used to memoize structured responses
#[async_trait]
pub trait CacheManager: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;
}

/// Cache key for a structured generation request.
///
/// Hashes provider, prompt, schema name and the parameters in key order,
/// so equal requests always map to the same key.
pub fn structured_cache_key(
    provider: &str,
    prompt: &str,
    schema_name: &str,
    sorted_params: &impl serde::Serialize,
) -> String {
    let params = serde_json::to_string(sorted_params).unwrap_or_default();
    let mut hasher = Sha256::new();
    for part in [provider, prompt, schema_name, params.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    format!("llm:structured:{}", digest)
}

/// Process-local cache with per-entry expiry
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: DashMap<String, (Value, Instant)>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
    }
}

#[async_trait]
impl CacheManager for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .and_then(|entry| (entry.1 > now).then(|| entry.0.clone()));
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = InMemoryCache::new();
        cache
            .set("k", json!({"text": "hi"}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"text": "hi"})));
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let cache = InMemoryCache::new();
        cache.set("k", json!(1), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let mut params = BTreeMap::new();
        params.insert("temperature", json!(0.2));
        params.insert("max_tokens", json!(100));

        let a = structured_cache_key("ollama", "prompt", "TextResponse", &params);
        let b = structured_cache_key("ollama", "prompt", "TextResponse", &params);
        let c = structured_cache_key("openai", "prompt", "TextResponse", &params);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("llm:structured:"));
    }
}
