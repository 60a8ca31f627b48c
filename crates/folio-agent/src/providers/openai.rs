// ABOUTME: OpenAI-compatible adapter implementing the TranslationProvider trait.
// ABOUTME: Sends Chat Completions requests in JSON mode and parses the word-level translation document.

use async_trait::async_trait;
use folio_core::translation::{TranslationRequest, TranslationResponse};
use serde_json::{Value, json};

use crate::provider::{
    ProviderError, TranslationProvider, parse_translation, system_prompt, user_prompt,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 4096;

/// OpenAI provider. Works against any server exposing `/v1/chat/completions`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    /// Create a provider from environment variables.
    /// Required: `OPENAI_API_KEY`
    /// Optional: `OPENAI_BASE_URL` (defaults to https://api.openai.com)
    /// Optional: `OPENAI_MODEL`, overridden by `model` when given
    pub fn from_env(model: Option<&str>) -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::NotConfigured("OPENAI_API_KEY not set".to_string()))?;

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let model = match model {
            Some(model) => model.to_string(),
            None => std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
        };

        Ok(Self::new(api_key, base_url, model))
    }

    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    /// Build the JSON request body for the Chat Completions API.
    pub fn build_request_body(&self, request: &TranslationRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": system_prompt(&request.target_language)},
                {"role": "user", "content": user_prompt(request)}
            ]
        })
    }

    /// Extract and parse the assistant message of a Chat Completions reply.
    pub fn parse_response(
        response_body: &Value,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, ProviderError> {
        let choice = response_body
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|choices| choices.first())
            .ok_or_else(|| {
                ProviderError::InvalidResponse("missing choices in response".to_string())
            })?;

        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("empty message content".to_string()))?;

        parse_translation(content, request)
    }
}

#[async_trait]
impl TranslationProvider for OpenAiProvider {
    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, ProviderError> {
        let body = self.build_request_body(request);
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Http(format!("request failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited);
        }

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::NotConfigured(
                "unauthorized: check OPENAI_API_KEY".to_string(),
            ));
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http(format!("API error {}: {}", status, error_body)));
        }

        let response_body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse JSON: {}", e)))?;

        Self::parse_response(&response_body, request)
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(
            "test-key".to_string(),
            "https://api.openai.com/".to_string(),
            "gpt-4o-mini".to_string(),
        )
    }

    fn request() -> TranslationRequest {
        TranslationRequest {
            text: "Hello world.".to_string(),
            target_language: "es".to_string(),
            source_language: None,
        }
    }

    #[test]
    fn openai_provider_creation() {
        let provider = provider();
        assert_eq!(provider.provider_name(), "openai");
        assert_eq!(provider.model_name(), "gpt-4o-mini");
        assert_eq!(provider.base_url, "https://api.openai.com");
    }

    #[test]
    fn builds_json_mode_request_body() {
        let body = provider().build_request_body(&request());

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"]["type"], "json_object");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0]["content"].as_str().unwrap().contains("'es'"));
        assert_eq!(messages[1]["content"], "Hello world.");
    }

    #[test]
    fn parses_chat_completion_content() {
        let content = json!({
            "sourceLanguage": "en",
            "targetLanguage": "es",
            "sentences": [{"fullTranslation": "Hola mundo.", "words": [
                {"original": "Hello", "translations": ["Hola"]},
                {"original": "world", "translations": ["mundo"]},
                {"original": ".", "isPunctuation": true}
            ]}]
        })
        .to_string();
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
        });

        let response = OpenAiProvider::parse_response(&body, &request()).unwrap();
        assert_eq!(response.source_language, "en");
        assert_eq!(response.sentences[0].words.len(), 3);
    }

    #[test]
    fn missing_choices_is_invalid() {
        let err = OpenAiProvider::parse_response(&json!({}), &request()).unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));

        let empty = json!({"choices": [{"message": {"content": ""}}]});
        let err = OpenAiProvider::parse_response(&empty, &request()).unwrap_err();
        assert!(err.to_string().contains("empty message content"));
    }

    #[test]
    fn from_env_requires_api_key() {
        // SAFETY: test-only env mutation; no other test in this crate reads this variable.
        unsafe { std::env::remove_var("OPENAI_API_KEY") };
        let err = OpenAiProvider::from_env(None).err().unwrap();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }

    #[cfg(feature = "live-test")]
    #[tokio::test]
    async fn live_openai_translation() {
        let provider = OpenAiProvider::from_env(None).unwrap();
        let response = provider.translate(&request()).await.unwrap();
        assert!(!response.sentences.is_empty());
    }
}
