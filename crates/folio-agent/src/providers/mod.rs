// ABOUTME: Provider module aggregating the translation backend adapters.
// ABOUTME: `create_provider` picks an adapter by name and wraps it in the response cache.

pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use folio_core::translation::{TranslationRequest, TranslationResponse};

use crate::cache::CachedProvider;
use crate::provider::{ProviderError, TranslationProvider};

/// Build the named provider, wrapped in a response cache. `model` overrides
/// the adapter's default model.
pub fn create_provider(
    name: &str,
    model: Option<&str>,
) -> Result<Arc<dyn TranslationProvider>, ProviderError> {
    match name.trim().to_lowercase().as_str() {
        "openai" => {
            let provider = openai::OpenAiProvider::from_env(model)?;
            tracing::info!(provider = "openai", model = %provider.model_name(), "translation provider ready");
            Ok(Arc::new(CachedProvider::new(provider)))
        }
        other => Err(ProviderError::NotConfigured(format!(
            "unknown provider: {}",
            other
        ))),
    }
}

/// Stands in when no provider could be configured; every call fails with
/// the configuration error.
pub struct UnavailableProvider {
    reason: String,
}

impl UnavailableProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl TranslationProvider for UnavailableProvider {
    async fn translate(
        &self,
        _request: &TranslationRequest,
    ) -> Result<TranslationResponse, ProviderError> {
        Err(ProviderError::NotConfigured(self.reason.clone()))
    }

    fn provider_name(&self) -> &str {
        "unavailable"
    }

    fn model_name(&self) -> &str {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_rejected() {
        let err = create_provider("carrier-pigeon", None).err().unwrap();
        assert!(err.to_string().contains("unknown provider: carrier-pigeon"));
    }

    #[tokio::test]
    async fn unavailable_provider_reports_reason() {
        let provider = UnavailableProvider::new("OPENAI_API_KEY not set");
        let request = TranslationRequest {
            text: "Hi.".to_string(),
            target_language: "es".to_string(),
            source_language: None,
        };
        let err = provider.translate(&request).await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
