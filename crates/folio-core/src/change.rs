// ABOUTME: Wire types for the change bus: one event per committed row mutation.
// ABOUTME: Events name the table, the row's UID, and whether it was inserted, updated, or deleted.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Every entity table that can appear on the change bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Books,
    Chapters,
    Paragraphs,
    Languages,
    Words,
    WordTranslations,
    ParagraphTranslations,
    SentenceTranslations,
    SentenceWordTranslations,
    TranslationQueue,
}

impl Table {
    /// The SQL table name backing this entity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Books => "books",
            Table::Chapters => "chapters",
            Table::Paragraphs => "paragraphs",
            Table::Languages => "languages",
            Table::Words => "words",
            Table::WordTranslations => "word_translations",
            Table::ParagraphTranslations => "paragraph_translations",
            Table::SentenceTranslations => "sentence_translations",
            Table::SentenceWordTranslations => "sentence_word_translations",
            Table::TranslationQueue => "translation_queue",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Insert,
    Update,
    Delete,
}

/// A single committed row mutation, published after its transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub uid: Ulid,
    pub action: ChangeAction,
}

impl ChangeEvent {
    pub fn new(table: Table, uid: Ulid, action: ChangeAction) -> Self {
        Self { table, uid, action }
    }

    pub fn insert(table: Table, uid: Ulid) -> Self {
        Self::new(table, uid, ChangeAction::Insert)
    }

    pub fn update(table: Table, uid: Ulid) -> Self {
        Self::new(table, uid, ChangeAction::Update)
    }

    pub fn delete(table: Table, uid: Ulid) -> Self {
        Self::new(table, uid, ChangeAction::Delete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_matches_wire_shape() {
        let uid = Ulid::new();
        let event = ChangeEvent::delete(Table::SentenceWordTranslations, uid);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["table"], "sentence_word_translations");
        assert_eq!(json["uid"], uid.to_string());
        assert_eq!(json["action"], "delete");
    }

    #[test]
    fn table_display_uses_sql_name() {
        assert_eq!(Table::ParagraphTranslations.to_string(), "paragraph_translations");
        assert_eq!(Table::TranslationQueue.as_str(), "translation_queue");
    }
}
