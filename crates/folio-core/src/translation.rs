// ABOUTME: Request and response schema exchanged with the external translation provider.
// ABOUTME: A response is a list of sentences, each a list of word tokens echoing the original text.

use serde::{Deserialize, Serialize};

/// What the scheduler asks a provider to translate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRequest {
    pub text: String,
    pub target_language: String,
    #[serde(default)]
    pub source_language: Option<String>,
}

/// The provider's structured, word-segmented translation of one paragraph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResponse {
    pub source_language: String,
    pub target_language: String,
    pub sentences: Vec<TranslatedSentence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedSentence {
    pub full_translation: String,
    #[serde(default)]
    pub words: Vec<TranslatedWord>,
}

/// One token of a sentence. `original` is the surface form the provider
/// echoed back, which may differ slightly from the stored original text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatedWord {
    pub original: String,
    #[serde(default)]
    pub is_punctuation: bool,
    #[serde(default)]
    pub is_standalone_punctuation: bool,
    #[serde(default)]
    pub is_opening_parenthesis: bool,
    #[serde(default)]
    pub is_closing_parenthesis: bool,
    #[serde(default)]
    pub translations: Vec<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub grammar: Grammar,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grammar {
    #[serde(default)]
    pub part_of_speech: Option<String>,
    #[serde(default)]
    pub initial_form: Option<String>,
    #[serde(default)]
    pub plurality: Option<String>,
    #[serde(default)]
    pub person: Option<String>,
    #[serde(default)]
    pub tense: Option<String>,
    #[serde(default)]
    pub case: Option<String>,
    #[serde(default)]
    pub other: Option<String>,
}

impl TranslatedWord {
    /// A plain word token with a single translation.
    pub fn word(original: &str, translation: &str) -> Self {
        Self {
            original: original.to_string(),
            translations: vec![translation.to_string()],
            ..Default::default()
        }
    }

    /// A punctuation token.
    pub fn punctuation(original: &str) -> Self {
        Self {
            original: original.to_string(),
            is_punctuation: true,
            ..Default::default()
        }
    }

    /// The dictionary form of this word: the provider's initial form when
    /// present, otherwise the surface form.
    pub fn dictionary_form(&self) -> &str {
        self.grammar
            .initial_form
            .as_deref()
            .map(str::trim)
            .filter(|form| !form.is_empty())
            .unwrap_or(self.original.trim())
    }
}

impl TranslationResponse {
    /// Check the structural requirements the store relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.target_language.trim().is_empty() {
            return Err("targetLanguage is empty".to_string());
        }
        if self.sentences.is_empty() {
            return Err("response has no sentences".to_string());
        }
        Ok(())
    }

    pub fn word_count(&self) -> usize {
        self.sentences.iter().map(|s| s.words.len()).sum()
    }
}
