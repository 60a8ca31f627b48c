// ABOUTME: Library facade: the operations a reader application performs against a running engine.
// ABOUTME: Imports, moves, deletes, translation requests, lookups, alignment, and live views of books.

use std::time::Duration;

use folio_agent::{SchedulerError, SchedulerHandle};
use folio_core::alignment::{Alignment, align};
use folio_core::change::Table;
use folio_core::command::Mutation;
use folio_core::model::{
    Book, Chapter, DictionaryEntry, NewBook, Paragraph, ParagraphTranslationTree,
    SentenceWordTranslation, normalize_language_code,
};
use folio_core::translation::TranslationResponse;
use folio_store::actor::{BridgeError, BridgeHandle};
use folio_store::live::{self, LiveOptions, LiveQuery};
use serde::Serialize;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::Engine;
use crate::folders::{self, FolderListing};
use crate::import;

/// Errors returned by library operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("{kind} not found: {uid}")]
    NotFound { kind: &'static str, uid: Ulid },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A paragraph, its stored translation, and the alignment between the two.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlignedParagraph {
    pub paragraph: Paragraph,
    pub translation: ParagraphTranslationTree,
    pub alignment: Alignment,
}

impl AlignedParagraph {
    /// The stored word row behind a word span's token reference.
    pub fn word(&self, sentence: usize, word: usize) -> Option<&SentenceWordTranslation> {
        self.translation.sentences.get(sentence)?.words.get(word)
    }
}

/// How a `translate_book` request was scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationPlan {
    pub untranslated: usize,
    pub scheduled: usize,
}

/// Facade over a running engine.
pub struct Library {
    engine: Engine,
    bridge: BridgeHandle,
    scheduler: SchedulerHandle,
    target_language: String,
    debounce: Duration,
}

impl Library {
    pub fn new(engine: Engine) -> Self {
        let bridge = engine.bridge().clone();
        let scheduler = engine.scheduler().clone();
        let target_language = engine.config().target_language.clone();
        let debounce = engine.config().debounce;
        Self {
            engine,
            bridge,
            scheduler,
            target_language,
            debounce,
        }
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// The configured default translation language.
    pub fn target_language(&self) -> &str {
        &self.target_language
    }

    fn language(&self, language: Option<&str>) -> String {
        language
            .map(normalize_language_code)
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| self.target_language.clone())
    }

    pub async fn shutdown(self) {
        let Self {
            engine,
            bridge,
            scheduler,
            ..
        } = self;
        drop(bridge);
        drop(scheduler);
        engine.shutdown().await;
    }

    // -- imports and mutations ------------------------------------------------

    /// Import plain text as a one-chapter book, one paragraph per blank-line
    /// separated block.
    pub async fn create_from_text(
        &self,
        title: &str,
        text: &str,
        path: &[String],
    ) -> Result<Mutation, LibraryError> {
        self.create(import::book_from_text(title, text, path)).await
    }

    /// Import a book that was parsed elsewhere (e.g. from an EPUB).
    pub async fn create_from_epub(&self, book: NewBook) -> Result<Mutation, LibraryError> {
        self.create(import::clean_book(book)).await
    }

    async fn create(&self, book: NewBook) -> Result<Mutation, LibraryError> {
        if book.title.is_empty() {
            return Err(LibraryError::InvalidInput("book title is empty".to_string()));
        }
        let paragraphs = import::paragraph_count(&book);
        if paragraphs == 0 {
            return Err(LibraryError::InvalidInput(format!(
                "{:?} has no paragraphs",
                book.title
            )));
        }

        let title = book.title.clone();
        let created = self.bridge.create_book(book).await?;
        tracing::info!(book = %created.uid, title = %title, paragraphs, "imported book");
        Ok(created)
    }

    /// Store a translation for a paragraph, replacing any previous one in
    /// the same language. `Ok(None)` means the paragraph no longer exists.
    pub async fn update_paragraph_translation(
        &self,
        paragraph_uid: Ulid,
        model: &str,
        translation: TranslationResponse,
    ) -> Result<Option<Mutation>, LibraryError> {
        let stored = self
            .bridge
            .update_paragraph_translation(paragraph_uid, model.to_string(), translation)
            .await?;
        if stored.is_none() {
            tracing::debug!(paragraph = %paragraph_uid, "translation for missing paragraph ignored");
        }
        Ok(stored)
    }

    /// Move a book to `path`; an empty path is the root.
    pub async fn update_book_path(
        &self,
        book_uid: Ulid,
        path: &[String],
    ) -> Result<Mutation, LibraryError> {
        let moved = self
            .bridge
            .update_book_path(book_uid, path.to_vec())
            .await?
            .ok_or(LibraryError::NotFound {
                kind: "book",
                uid: book_uid,
            })?;
        tracing::info!(book = %book_uid, path = ?path, "moved book");
        Ok(moved)
    }

    /// Delete a book and everything beneath it. Dictionary rows are kept.
    pub async fn delete_book(&self, book_uid: Ulid) -> Result<Mutation, LibraryError> {
        let deleted = self
            .bridge
            .delete_book(book_uid)
            .await?
            .ok_or(LibraryError::NotFound {
                kind: "book",
                uid: book_uid,
            })?;
        tracing::info!(book = %book_uid, rows = deleted.touched.len(), "deleted book");
        Ok(deleted)
    }

    /// Schedule every untranslated paragraph of a book and keep watching it.
    /// Progress is visible through the scheduler's status and failure channel.
    pub async fn translate_book(
        &self,
        book_uid: Ulid,
        language: Option<&str>,
    ) -> Result<TranslationPlan, LibraryError> {
        let language = self.language(language);
        self.get_book(book_uid).await?.ok_or(LibraryError::NotFound {
            kind: "book",
            uid: book_uid,
        })?;

        let untranslated = self
            .bridge
            .list_untranslated_paragraphs(book_uid, &language)
            .await?;
        let mut scheduled = 0;
        for paragraph in &untranslated {
            if self
                .scheduler
                .enqueue(paragraph.uid, book_uid, &language)
                .await?
            {
                scheduled += 1;
            }
        }
        self.scheduler.watch_book(book_uid, &language).await?;

        tracing::info!(
            book = %book_uid,
            language = %language,
            untranslated = untranslated.len(),
            scheduled,
            "translation requested"
        );
        Ok(TranslationPlan {
            untranslated: untranslated.len(),
            scheduled,
        })
    }

    // -- reads ---------------------------------------------------------------

    /// All books, ordered by title.
    pub async fn list_books(&self) -> Result<Vec<Book>, LibraryError> {
        Ok(self.bridge.list_books().await?)
    }

    /// The subfolders and books directly inside `path`.
    pub async fn list_folder(&self, path: &[String]) -> Result<FolderListing, LibraryError> {
        let books = self.bridge.list_books().await?;
        Ok(folders::list_folder(&books, path))
    }

    pub async fn get_book(&self, book_uid: Ulid) -> Result<Option<Book>, LibraryError> {
        Ok(self.bridge.get_book(book_uid).await?)
    }

    pub async fn list_chapters(&self, book_uid: Ulid) -> Result<Vec<Chapter>, LibraryError> {
        Ok(self.bridge.list_chapters(book_uid).await?)
    }

    pub async fn list_paragraphs(&self, chapter_uid: Ulid) -> Result<Vec<Paragraph>, LibraryError> {
        Ok(self.bridge.list_paragraphs(chapter_uid).await?)
    }

    pub async fn get_paragraph(&self, paragraph_uid: Ulid) -> Result<Option<Paragraph>, LibraryError> {
        Ok(self.bridge.get_paragraph(paragraph_uid).await?)
    }

    pub async fn list_untranslated_paragraphs(
        &self,
        book_uid: Ulid,
        language: Option<&str>,
    ) -> Result<Vec<Paragraph>, LibraryError> {
        let language = self.language(language);
        Ok(self
            .bridge
            .list_untranslated_paragraphs(book_uid, &language)
            .await?)
    }

    pub async fn get_paragraph_translation(
        &self,
        paragraph_uid: Ulid,
        language: Option<&str>,
    ) -> Result<Option<ParagraphTranslationTree>, LibraryError> {
        let language = self.language(language);
        Ok(self
            .bridge
            .get_paragraph_translation(paragraph_uid, &language)
            .await?)
    }

    /// A paragraph's stored translation aligned against its original text.
    /// `Ok(None)` when the paragraph has no translation in that language.
    pub async fn aligned_paragraph(
        &self,
        paragraph_uid: Ulid,
        language: Option<&str>,
    ) -> Result<Option<AlignedParagraph>, LibraryError> {
        let paragraph = self
            .get_paragraph(paragraph_uid)
            .await?
            .ok_or(LibraryError::NotFound {
                kind: "paragraph",
                uid: paragraph_uid,
            })?;
        let Some(translation) = self.get_paragraph_translation(paragraph_uid, language).await? else {
            return Ok(None);
        };

        let sentences: Vec<&[SentenceWordTranslation]> = translation
            .sentences
            .iter()
            .map(|sentence| sentence.words.as_slice())
            .collect();
        let alignment = align(&paragraph.original_text, &sentences);
        if !alignment.unmatched.is_empty() {
            tracing::debug!(
                paragraph = %paragraph_uid,
                unmatched = alignment.unmatched.len(),
                "some translated words could not be placed in the original text"
            );
        }

        Ok(Some(AlignedParagraph {
            paragraph,
            translation,
            alignment,
        }))
    }

    /// Dictionary lookup: `word` in its original language, with every known
    /// translation.
    pub async fn lookup_word(
        &self,
        language: &str,
        word: &str,
    ) -> Result<Option<DictionaryEntry>, LibraryError> {
        Ok(self.bridge.lookup_word(language, word).await?)
    }

    // -- live views ----------------------------------------------------------

    /// The book list, refreshed whenever any book changes.
    pub fn watch_books(&self) -> LiveQuery<Vec<Book>> {
        let options = LiveOptions::new([Table::Books]).debounce(self.debounce);
        live::watch_bridge(&self.bridge, options, |bridge: BridgeHandle| async move {
            bridge.list_books().await
        })
    }

    /// One book, refreshed when it changes (progress, moves, deletion).
    pub fn watch_book(&self, book_uid: Ulid) -> LiveQuery<Option<Book>> {
        let options = LiveOptions::new([Table::Books])
            .narrowed([book_uid])
            .debounce(self.debounce);
        live::watch_bridge(&self.bridge, options, move |bridge: BridgeHandle| async move {
            bridge.get_book(book_uid).await
        })
    }

    /// A paragraph's translation, refreshed only when that paragraph changes.
    pub fn watch_paragraph_translation(
        &self,
        paragraph_uid: Ulid,
        language: Option<&str>,
    ) -> LiveQuery<Option<ParagraphTranslationTree>> {
        let language = self.language(language);
        let options = LiveOptions::new([Table::Paragraphs, Table::ParagraphTranslations])
            .narrowed([paragraph_uid])
            .debounce(self.debounce);
        live::watch_bridge(&self.bridge, options, move |bridge: BridgeHandle| {
            let language = language.clone();
            async move {
                bridge
                    .get_paragraph_translation(paragraph_uid, &language)
                    .await
            }
        })
    }
}
