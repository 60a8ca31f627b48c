// ABOUTME: Typed records for every persisted folio entity, plus the input shapes used at import time.
// ABOUTME: All cross-entity references are ULIDs; storage row numbers never leave the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// A book in the library. `path` is the folder location as ordered segments;
/// an empty path means the book sits at the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub uid: Ulid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    pub paragraph_count: u32,
    pub translated_paragraphs: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub uid: Ulid,
    pub book_uid: Ulid,
    pub order: u32,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A paragraph of original text. `book_uid` is denormalized from the owning
/// chapter so book-scoped queries need no join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paragraph {
    pub uid: Ulid,
    pub chapter_uid: Ulid,
    pub book_uid: Ulid,
    pub order: u32,
    pub original_text: String,
    pub original_html: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Dictionary entry for a surface form in its original language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Word {
    pub uid: Ulid,
    pub original_language_uid: Ulid,
    pub original: String,
    pub original_normalized: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTranslation {
    pub uid: Ulid,
    pub language_uid: Ulid,
    pub original_word_uid: Ulid,
    pub translation: String,
    pub translation_normalized: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphTranslation {
    pub uid: Ulid,
    pub paragraph_uid: Ulid,
    pub language_uid: Ulid,
    pub language_code: String,
    pub translating_model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceTranslation {
    pub uid: Ulid,
    pub paragraph_translation_uid: Ulid,
    pub order: u32,
    pub full_translation: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Grammatical context of one word occurrence, as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrammarContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of_speech: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plurality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tense: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl GrammarContext {
    pub fn is_empty(&self) -> bool {
        *self == GrammarContext::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceWordTranslation {
    pub uid: Ulid,
    pub sentence_uid: Ulid,
    pub order: u32,
    pub original: String,
    pub is_punctuation: bool,
    pub is_standalone_punctuation: bool,
    pub is_opening_parenthesis: bool,
    pub is_closing_parenthesis: bool,
    pub word_translation_uid: Option<Ulid>,
    pub word_translation_in_context: Vec<String>,
    pub grammar_context: Option<GrammarContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A sentence together with its ordered word rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceTree {
    pub sentence: SentenceTranslation,
    pub words: Vec<SentenceWordTranslation>,
}

/// A paragraph translation with every sentence and word beneath it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParagraphTranslationTree {
    pub translation: ParagraphTranslation,
    pub sentences: Vec<SentenceTree>,
}

/// A dictionary word with all of its known translations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DictionaryEntry {
    pub word: Word,
    pub translations: Vec<WordTranslation>,
}

/// A pending translation job recorded in the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub paragraph_uid: Ulid,
    pub book_uid: Ulid,
    pub language: String,
    pub model: String,
}

/// Input shape for importing a book: already-parsed chapters and paragraphs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    pub title: String,
    #[serde(default)]
    pub path: Vec<String>,
    pub chapters: Vec<NewChapter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChapter {
    #[serde(default)]
    pub title: Option<String>,
    pub paragraphs: Vec<NewParagraph>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewParagraph {
    pub text: String,
    #[serde(default)]
    pub html: Option<String>,
}

impl NewParagraph {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            html: None,
        }
    }
}

/// Normalize a language code for storage and uniqueness: trimmed, lowercase.
pub fn normalize_language_code(code: &str) -> String {
    code.trim().to_lowercase()
}

/// Normalize a word or translation surface form for dictionary uniqueness.
pub fn normalize_word(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Normalize a folder path: trims segments and drops empty ones, so a
/// path of `[""]` or `["  "]` is the root.
pub fn normalize_path(path: &[String]) -> Vec<String> {
    path.iter()
        .map(|segment| segment.trim())
        .filter(|segment| !segment.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_at_root_omits_path_when_serialized() {
        let now = Utc::now();
        let book = Book {
            uid: Ulid::new(),
            title: "Root Book".to_string(),
            path: Vec::new(),
            paragraph_count: 0,
            translated_paragraphs: 0,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&book).unwrap();
        assert!(json.get("path").is_none());
        assert_eq!(json["title"], "Root Book");
        assert_eq!(json["translatedParagraphs"], 0);
    }

    #[test]
    fn normalizers_trim_and_lowercase() {
        assert_eq!(normalize_language_code(" ES "), "es");
        assert_eq!(normalize_word("  Hello"), "hello");
        assert_eq!(
            normalize_path(&["Fiction".to_string(), " ".to_string(), " Sci-Fi ".to_string()]),
            vec!["Fiction".to_string(), "Sci-Fi".to_string()]
        );
        assert!(normalize_path(&[String::new()]).is_empty());
    }

    #[test]
    fn empty_grammar_context_is_detected() {
        assert!(GrammarContext::default().is_empty());
        let ctx = GrammarContext {
            tense: Some("past".to_string()),
            ..Default::default()
        };
        assert!(!ctx.is_empty());
    }
}
