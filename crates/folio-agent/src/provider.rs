// ABOUTME: Defines the TranslationProvider trait that every translation backend implements.
// ABOUTME: Also holds ProviderError and the shared prompt and response parsing used by adapters.

use async_trait::async_trait;
use folio_core::translation::{TranslationRequest, TranslationResponse};

/// Errors a translation provider can produce. All of them are retryable from
/// the scheduler's point of view.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("http error: {0}")]
    Http(String),

    #[error("rate limited")]
    RateLimited,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited)
    }
}

/// A backend that turns paragraph text into a word-segmented translation.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<TranslationResponse, ProviderError>;

    /// Provider name for logging and display (e.g. "openai").
    fn provider_name(&self) -> &str;

    /// Model identifier recorded on every stored translation.
    fn model_name(&self) -> &str;
}

/// System prompt describing the JSON document a provider must return.
pub fn system_prompt(target_language: &str) -> String {
    format!(
        "You translate paragraphs of a book into the language with code '{target_language}'. \
         Reply with a single JSON object and nothing else, shaped as: \
         {{\"sourceLanguage\": \"<code>\", \"targetLanguage\": \"{target_language}\", \
         \"sentences\": [{{\"fullTranslation\": \"<sentence translation>\", \"words\": [\
         {{\"original\": \"<word exactly as written>\", \"isPunctuation\": false, \
         \"isStandalonePunctuation\": false, \"isOpeningParenthesis\": false, \
         \"isClosingParenthesis\": false, \"translations\": [\"<in-context translation>\"], \
         \"note\": null, \"grammar\": {{\"partOfSpeech\": null, \"initialForm\": null, \
         \"plurality\": null, \"person\": null, \"tense\": null, \"case\": null, \"other\": null}}}}]}}]}}. \
         List every word and punctuation mark of the original in order. \
         Punctuation tokens set isPunctuation to true and have no translations."
    )
}

/// User message carrying the paragraph to translate.
pub fn user_prompt(request: &TranslationRequest) -> String {
    match &request.source_language {
        Some(source) => format!("Source language: {source}\n\n{}", request.text),
        None => request.text.clone(),
    }
}

/// Parse a provider's text reply into a validated response. Tolerates a
/// surrounding markdown code fence and fills an empty target language with
/// the requested one.
pub fn parse_translation(
    content: &str,
    request: &TranslationRequest,
) -> Result<TranslationResponse, ProviderError> {
    let json = strip_code_fence(content);
    let mut response: TranslationResponse = serde_json::from_str(json)
        .map_err(|e| ProviderError::InvalidResponse(format!("failed to parse translation: {}", e)))?;

    if response.target_language.trim().is_empty() {
        response.target_language = request.target_language.clone();
    }
    if response.source_language.trim().is_empty()
        && let Some(source) = &request.source_language
    {
        response.source_language = source.clone();
    }
    response.validate().map_err(ProviderError::InvalidResponse)?;
    Ok(response)
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
