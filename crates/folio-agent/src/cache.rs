// ABOUTME: Response cache wrapping any TranslationProvider, keyed by a SHA-256 content hash.
// ABOUTME: Identical (model, target language, text) requests are answered without calling the provider again.

use std::collections::HashMap;

use async_trait::async_trait;
use folio_core::translation::{TranslationRequest, TranslationResponse};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::provider::{ProviderError, TranslationProvider};

/// Hex SHA-256 over the fields that determine a provider's answer.
pub fn cache_key(model: &str, request: &TranslationRequest) -> String {
    let mut hasher = Sha256::new();
    for part in [
        model,
        request.target_language.trim(),
        request.source_language.as_deref().unwrap_or(""),
        request.text.as_str(),
    ] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Caches successful responses in memory. Failures are never cached.
pub struct CachedProvider<P> {
    inner: P,
    entries: RwLock<HashMap<String, TranslationResponse>>,
}

impl<P: TranslationProvider> CachedProvider<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl<P: TranslationProvider> TranslationProvider for CachedProvider<P> {
    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, ProviderError> {
        let key = cache_key(self.inner.model_name(), request);
        if let Some(hit) = self.entries.read().await.get(&key) {
            tracing::debug!(key = %key, "translation cache hit");
            return Ok(hit.clone());
        }

        let response = self.inner.translate(request).await?;
        self.entries.write().await.insert(key, response.clone());
        Ok(response)
    }

    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubProvider;

    fn request(text: &str, target: &str) -> TranslationRequest {
        TranslationRequest {
            text: text.to_string(),
            target_language: target.to_string(),
            source_language: None,
        }
    }

    #[test]
    fn key_depends_on_every_field() {
        let base = cache_key("m", &request("Hello", "es"));
        assert_eq!(base.len(), 64);
        assert_eq!(base, cache_key("m", &request("Hello", "es")));
        assert_ne!(base, cache_key("other", &request("Hello", "es")));
        assert_ne!(base, cache_key("m", &request("Hello", "fr")));
        assert_ne!(base, cache_key("m", &request("Hello!", "es")));
        // Length prefixes keep field boundaries unambiguous.
        assert_ne!(cache_key("ab", &request("c", "es")), cache_key("a", &request("bc", "es")));
    }

    #[tokio::test]
    async fn identical_requests_hit_the_cache() {
        let stub = StubProvider::new();
        let calls = stub.call_counter();
        let cached = CachedProvider::new(stub);

        let first = cached.translate(&request("Hello world.", "es")).await.unwrap();
        let second = cached.translate(&request("Hello world.", "es")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        cached.translate(&request("Goodbye.", "es")).await.unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(cached.len().await, 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let stub = StubProvider::new().then_fail(ProviderError::RateLimited);
        let calls = stub.call_counter();
        let cached = CachedProvider::new(stub);

        assert!(cached.translate(&request("Hi.", "es")).await.is_err());
        assert!(cached.translate(&request("Hi.", "es")).await.is_ok());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(!cached.is_empty().await);
    }
}
