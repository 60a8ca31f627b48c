// ABOUTME: Typed row operations for the library tables, executed only by the store owner.
// ABOUTME: Writes run inside a Tx and record one change event per affected row; reads map rows to records.

use std::error::Error as StdError;

use chrono::{DateTime, Utc};
use folio_core::change::{ChangeEvent, Table};
use folio_core::model::{
    Book, Chapter, DictionaryEntry, GrammarContext, NewBook, Paragraph, ParagraphTranslation,
    ParagraphTranslationTree, QueuedJob, SentenceTranslation, SentenceTree,
    SentenceWordTranslation, Word, WordTranslation, normalize_language_code, normalize_path,
    normalize_word,
};
use folio_core::translation::{TranslatedWord, TranslationResponse};
use folio_core::uid::new_uid;
use rusqlite::types::Type;
use rusqlite::{Connection, Row, params};
use serde::de::DeserializeOwned;
use ulid::Ulid;

use crate::sqlite::{StoreError, Tx};

/// Language code recorded when the provider does not report a source language.
pub const UNDETERMINED_LANGUAGE: &str = "und";

const BOOK_COLUMNS: &str =
    "uid, title, path, paragraph_count, translated_paragraphs, created_at, updated_at";
const CHAPTER_COLUMNS: &str = "uid, book_uid, sort_order, title, created_at, updated_at";
const PARAGRAPH_COLUMNS: &str = "p.uid, p.chapter_uid, p.book_uid, p.sort_order, p.original_text, \
     p.original_html, p.created_at, p.updated_at";

fn now() -> String {
    Utc::now().to_rfc3339()
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn conversion_error(idx: usize, err: impl StdError + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Ulid> {
    let raw: String = row.get(idx)?;
    Ulid::from_string(&raw).map_err(|e| conversion_error(idx, e))
}

fn opt_uid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Ulid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Ulid::from_string(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn ts_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn json_at<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| serde_json::from_str(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        uid: uid_at(row, 0)?,
        title: row.get(1)?,
        path: json_at::<Vec<String>>(row, 2)?.unwrap_or_default(),
        paragraph_count: row.get(3)?,
        translated_paragraphs: row.get(4)?,
        created_at: ts_at(row, 5)?,
        updated_at: ts_at(row, 6)?,
    })
}

fn chapter_from_row(row: &Row<'_>) -> rusqlite::Result<Chapter> {
    Ok(Chapter {
        uid: uid_at(row, 0)?,
        book_uid: uid_at(row, 1)?,
        order: row.get(2)?,
        title: row.get(3)?,
        created_at: ts_at(row, 4)?,
        updated_at: ts_at(row, 5)?,
    })
}

fn paragraph_from_row(row: &Row<'_>) -> rusqlite::Result<Paragraph> {
    Ok(Paragraph {
        uid: uid_at(row, 0)?,
        chapter_uid: uid_at(row, 1)?,
        book_uid: uid_at(row, 2)?,
        order: row.get(3)?,
        original_text: row.get(4)?,
        original_html: row.get(5)?,
        created_at: ts_at(row, 6)?,
        updated_at: ts_at(row, 7)?,
    })
}

fn word_from_row(row: &Row<'_>) -> rusqlite::Result<Word> {
    Ok(Word {
        uid: uid_at(row, 0)?,
        original_language_uid: uid_at(row, 1)?,
        original: row.get(2)?,
        original_normalized: row.get(3)?,
        created_at: ts_at(row, 4)?,
        updated_at: ts_at(row, 5)?,
    })
}

fn word_translation_from_row(row: &Row<'_>) -> rusqlite::Result<WordTranslation> {
    Ok(WordTranslation {
        uid: uid_at(row, 0)?,
        language_uid: uid_at(row, 1)?,
        original_word_uid: uid_at(row, 2)?,
        translation: row.get(3)?,
        translation_normalized: row.get(4)?,
        created_at: ts_at(row, 5)?,
        updated_at: ts_at(row, 6)?,
    })
}

fn sentence_word_from_row(row: &Row<'_>) -> rusqlite::Result<SentenceWordTranslation> {
    Ok(SentenceWordTranslation {
        uid: uid_at(row, 0)?,
        sentence_uid: uid_at(row, 1)?,
        order: row.get(2)?,
        original: row.get(3)?,
        is_punctuation: row.get(4)?,
        is_standalone_punctuation: row.get(5)?,
        is_opening_parenthesis: row.get(6)?,
        is_closing_parenthesis: row.get(7)?,
        word_translation_uid: opt_uid_at(row, 8)?,
        word_translation_in_context: json_at(row, 9)?.unwrap_or_default(),
        grammar_context: json_at(row, 10)?,
        created_at: ts_at(row, 11)?,
        updated_at: ts_at(row, 12)?,
    })
}

/// Remove duplicates while keeping first-seen order.
pub fn touched_uids(events: &[ChangeEvent]) -> Vec<Ulid> {
    let mut seen = std::collections::HashSet::new();
    events
        .iter()
        .filter(|e| seen.insert(e.uid))
        .map(|e| e.uid)
        .collect()
}

// ---------------------------------------------------------------------------
// Books, chapters, paragraphs
// ---------------------------------------------------------------------------

/// Insert a book with all of its chapters and paragraphs. Events are
/// recorded parents first.
pub fn create_book(tx: &mut Tx<'_>, book: &NewBook) -> Result<Ulid, StoreError> {
    let book_uid = new_uid();
    let ts = now();
    let path = path_json(&book.path)?;
    let paragraph_count: usize = book.chapters.iter().map(|c| c.paragraphs.len()).sum();

    tx.execute(
        "INSERT INTO books (uid, title, path, paragraph_count, translated_paragraphs, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![book_uid.to_string(), book.title, path, paragraph_count as u32, ts],
    )?;
    tx.record(ChangeEvent::insert(Table::Books, book_uid));

    for (chapter_order, chapter) in book.chapters.iter().enumerate() {
        let chapter_uid = new_uid();
        tx.execute(
            "INSERT INTO chapters (uid, book_uid, sort_order, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                chapter_uid.to_string(),
                book_uid.to_string(),
                chapter_order as u32,
                chapter.title,
                ts
            ],
        )?;
        tx.record(ChangeEvent::insert(Table::Chapters, chapter_uid));

        for (paragraph_order, paragraph) in chapter.paragraphs.iter().enumerate() {
            let paragraph_uid = new_uid();
            tx.execute(
                "INSERT INTO paragraphs (uid, chapter_uid, book_uid, sort_order, original_text, original_html, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    paragraph_uid.to_string(),
                    chapter_uid.to_string(),
                    book_uid.to_string(),
                    paragraph_order as u32,
                    paragraph.text,
                    paragraph.html,
                    ts
                ],
            )?;
            tx.record(ChangeEvent::insert(Table::Paragraphs, paragraph_uid));
        }
    }

    Ok(book_uid)
}

fn path_json(path: &[String]) -> Result<Option<String>, StoreError> {
    let normalized = normalize_path(path);
    if normalized.is_empty() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(&normalized)?))
    }
}

/// Move a book to another folder. Returns None when the book does not exist.
pub fn update_book_path(
    tx: &mut Tx<'_>,
    book_uid: &Ulid,
    path: &[String],
) -> Result<Option<Ulid>, StoreError> {
    let changed = tx.execute(
        "UPDATE books SET path = ?1, updated_at = ?2 WHERE uid = ?3",
        params![path_json(path)?, now(), book_uid.to_string()],
    )?;
    if changed == 0 {
        return Ok(None);
    }
    tx.record(ChangeEvent::update(Table::Books, *book_uid));
    Ok(Some(*book_uid))
}

/// Delete `uids` from `table` and record one delete event per row.
fn delete_rows(tx: &mut Tx<'_>, table: Table, uids: &[Ulid]) -> Result<(), StoreError> {
    let sql = format!("DELETE FROM {} WHERE uid = ?1", table.as_str());
    for uid in uids {
        tx.execute(&sql, params![uid.to_string()])?;
        tx.record(ChangeEvent::delete(table, *uid));
    }
    Ok(())
}

fn select_uids(tx: &Tx<'_>, sql: &str, key: &Ulid) -> Result<Vec<Ulid>, StoreError> {
    tx.select_many(sql, params![key.to_string()], |row| uid_at(row, 0))
}

/// Delete a book and every descendant row. Deletion (and event) order is
/// fixed: sentence words, sentences, paragraph translations, queued jobs,
/// paragraphs, chapters, then the book. Dictionary rows are never touched.
pub fn delete_book(tx: &mut Tx<'_>, book_uid: &Ulid) -> Result<Option<Ulid>, StoreError> {
    let exists: Option<String> = tx.select_one(
        "SELECT uid FROM books WHERE uid = ?1",
        params![book_uid.to_string()],
        |row| row.get(0),
    )?;
    if exists.is_none() {
        return Ok(None);
    }

    let words = select_uids(
        tx,
        "SELECT w.uid FROM sentence_word_translations w
         JOIN sentence_translations s ON w.sentence_uid = s.uid
         JOIN paragraph_translations pt ON s.paragraph_translation_uid = pt.uid
         JOIN paragraphs p ON pt.paragraph_uid = p.uid
         WHERE p.book_uid = ?1
         ORDER BY w.uid",
        book_uid,
    )?;
    let sentences = select_uids(
        tx,
        "SELECT s.uid FROM sentence_translations s
         JOIN paragraph_translations pt ON s.paragraph_translation_uid = pt.uid
         JOIN paragraphs p ON pt.paragraph_uid = p.uid
         WHERE p.book_uid = ?1
         ORDER BY s.uid",
        book_uid,
    )?;
    let translations = select_uids(
        tx,
        "SELECT pt.uid FROM paragraph_translations pt
         JOIN paragraphs p ON pt.paragraph_uid = p.uid
         WHERE p.book_uid = ?1
         ORDER BY pt.uid",
        book_uid,
    )?;
    let queued = select_uids(
        tx,
        "SELECT uid FROM translation_queue
         WHERE book_uid = ?1
            OR paragraph_uid IN (SELECT uid FROM paragraphs WHERE book_uid = ?1)
         ORDER BY uid",
        book_uid,
    )?;
    let paragraphs = select_uids(
        tx,
        "SELECT uid FROM paragraphs WHERE book_uid = ?1 ORDER BY uid",
        book_uid,
    )?;
    let chapters = select_uids(
        tx,
        "SELECT uid FROM chapters WHERE book_uid = ?1 ORDER BY uid",
        book_uid,
    )?;

    delete_rows(tx, Table::SentenceWordTranslations, &words)?;
    delete_rows(tx, Table::SentenceTranslations, &sentences)?;
    delete_rows(tx, Table::ParagraphTranslations, &translations)?;
    delete_rows(tx, Table::TranslationQueue, &queued)?;
    delete_rows(tx, Table::Paragraphs, &paragraphs)?;
    delete_rows(tx, Table::Chapters, &chapters)?;
    delete_rows(tx, Table::Books, &[*book_uid])?;

    tracing::debug!(
        book = %book_uid,
        chapters = chapters.len(),
        paragraphs = paragraphs.len(),
        translations = translations.len(),
        "cascaded book delete"
    );
    Ok(Some(*book_uid))
}

// ---------------------------------------------------------------------------
// Dictionary
// ---------------------------------------------------------------------------

/// Find or create the language with this code. Languages are shared and
/// append-only.
pub fn get_or_insert_language(tx: &mut Tx<'_>, code: &str) -> Result<Ulid, StoreError> {
    let code = normalize_language_code(code);
    let existing = tx.select_one(
        "SELECT uid FROM languages WHERE code = ?1",
        params![code],
        |row| uid_at(row, 0),
    )?;
    if let Some(uid) = existing {
        return Ok(uid);
    }
    let uid = new_uid();
    tx.execute(
        "INSERT INTO languages (uid, code, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        params![uid.to_string(), code, now()],
    )?;
    tx.record(ChangeEvent::insert(Table::Languages, uid));
    Ok(uid)
}

/// Find or create the dictionary word for (language, normalized form).
pub fn get_or_insert_word(
    tx: &mut Tx<'_>,
    language_uid: &Ulid,
    original: &str,
) -> Result<Ulid, StoreError> {
    let normalized = normalize_word(original);
    let existing = tx.select_one(
        "SELECT uid FROM words WHERE original_language_uid = ?1 AND original_normalized = ?2",
        params![language_uid.to_string(), normalized],
        |row| uid_at(row, 0),
    )?;
    if let Some(uid) = existing {
        return Ok(uid);
    }
    let uid = new_uid();
    tx.execute(
        "INSERT INTO words (uid, original_language_uid, original, original_normalized, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            uid.to_string(),
            language_uid.to_string(),
            original.trim(),
            normalized,
            now()
        ],
    )?;
    tx.record(ChangeEvent::insert(Table::Words, uid));
    Ok(uid)
}

/// Find or create the translation of `word_uid` into `language_uid`.
pub fn get_or_insert_word_translation(
    tx: &mut Tx<'_>,
    language_uid: &Ulid,
    word_uid: &Ulid,
    translation: &str,
) -> Result<Ulid, StoreError> {
    let normalized = normalize_word(translation);
    let existing = tx.select_one(
        "SELECT uid FROM word_translations
         WHERE language_uid = ?1 AND original_word_uid = ?2 AND translation_normalized = ?3",
        params![language_uid.to_string(), word_uid.to_string(), normalized],
        |row| uid_at(row, 0),
    )?;
    if let Some(uid) = existing {
        return Ok(uid);
    }
    let uid = new_uid();
    tx.execute(
        "INSERT INTO word_translations
            (uid, language_uid, original_word_uid, translation, translation_normalized, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            uid.to_string(),
            language_uid.to_string(),
            word_uid.to_string(),
            translation.trim(),
            normalized,
            now()
        ],
    )?;
    tx.record(ChangeEvent::insert(Table::WordTranslations, uid));
    Ok(uid)
}

// ---------------------------------------------------------------------------
// Translations
// ---------------------------------------------------------------------------

/// Delete one paragraph translation and its sentences and words.
fn delete_paragraph_translation(tx: &mut Tx<'_>, translation_uid: &Ulid) -> Result<(), StoreError> {
    let words = select_uids(
        tx,
        "SELECT w.uid FROM sentence_word_translations w
         JOIN sentence_translations s ON w.sentence_uid = s.uid
         WHERE s.paragraph_translation_uid = ?1
         ORDER BY w.uid",
        translation_uid,
    )?;
    let sentences = select_uids(
        tx,
        "SELECT uid FROM sentence_translations WHERE paragraph_translation_uid = ?1 ORDER BY uid",
        translation_uid,
    )?;
    delete_rows(tx, Table::SentenceWordTranslations, &words)?;
    delete_rows(tx, Table::SentenceTranslations, &sentences)?;
    delete_rows(tx, Table::ParagraphTranslations, &[*translation_uid])
}

fn grammar_context(word: &TranslatedWord) -> Option<GrammarContext> {
    let grammar = &word.grammar;
    let ctx = GrammarContext {
        part_of_speech: grammar.part_of_speech.clone(),
        plurality: grammar.plurality.clone(),
        person: grammar.person.clone(),
        tense: grammar.tense.clone(),
        case: grammar.case.clone(),
        note: word.note.clone().or_else(|| grammar.other.clone()),
    };
    (!ctx.is_empty()).then_some(ctx)
}

/// Replace the translation of a paragraph for the response's target language.
///
/// Re-checks that the paragraph exists inside the transaction: a paragraph
/// deleted while its translation was in flight yields `Ok(None)` and writes
/// nothing. Any prior translation for the same (paragraph, language) is
/// deleted first, so at most one survives.
pub fn update_paragraph_translation(
    tx: &mut Tx<'_>,
    paragraph_uid: &Ulid,
    model: &str,
    response: &TranslationResponse,
) -> Result<Option<Ulid>, StoreError> {
    response.validate().map_err(StoreError::InvalidTranslation)?;

    let book_uid = tx.select_one(
        "SELECT book_uid FROM paragraphs WHERE uid = ?1",
        params![paragraph_uid.to_string()],
        |row| uid_at(row, 0),
    )?;
    let Some(book_uid) = book_uid else {
        return Ok(None);
    };

    let target_code = normalize_language_code(&response.target_language);
    let source_code = match normalize_language_code(&response.source_language) {
        code if code.is_empty() => UNDETERMINED_LANGUAGE.to_string(),
        code => code,
    };
    let target_uid = get_or_insert_language(tx, &target_code)?;
    let source_uid = get_or_insert_language(tx, &source_code)?;

    let previous = tx.select_many(
        "SELECT uid FROM paragraph_translations WHERE paragraph_uid = ?1 AND language_uid = ?2",
        params![paragraph_uid.to_string(), target_uid.to_string()],
        |row| uid_at(row, 0),
    )?;
    for translation_uid in &previous {
        delete_paragraph_translation(tx, translation_uid)?;
    }

    let ts = now();
    let translation_uid = new_uid();
    tx.execute(
        "INSERT INTO paragraph_translations (uid, paragraph_uid, language_uid, translating_model, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![
            translation_uid.to_string(),
            paragraph_uid.to_string(),
            target_uid.to_string(),
            model,
            ts
        ],
    )?;
    tx.record(ChangeEvent::insert(Table::ParagraphTranslations, translation_uid));

    for (sentence_order, sentence) in response.sentences.iter().enumerate() {
        let sentence_uid = new_uid();
        tx.execute(
            "INSERT INTO sentence_translations (uid, paragraph_translation_uid, sort_order, full_translation, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                sentence_uid.to_string(),
                translation_uid.to_string(),
                sentence_order as u32,
                sentence.full_translation,
                ts
            ],
        )?;
        tx.record(ChangeEvent::insert(Table::SentenceTranslations, sentence_uid));

        for (word_order, word) in sentence.words.iter().enumerate() {
            let primary = word
                .translations
                .iter()
                .map(|t| t.trim())
                .find(|t| !t.is_empty());
            let word_translation_uid = match primary {
                Some(translation) if !word.is_punctuation => {
                    let word_uid = get_or_insert_word(tx, &source_uid, word.dictionary_form())?;
                    Some(get_or_insert_word_translation(
                        tx,
                        &target_uid,
                        &word_uid,
                        translation,
                    )?)
                }
                _ => None,
            };
            let in_context = serde_json::to_string(&word.translations)?;
            let grammar = grammar_context(word)
                .map(|ctx| serde_json::to_string(&ctx))
                .transpose()?;

            let word_row_uid = new_uid();
            tx.execute(
                "INSERT INTO sentence_word_translations
                    (uid, sentence_uid, sort_order, original, is_punctuation, is_standalone_punctuation,
                     is_opening_parenthesis, is_closing_parenthesis, word_translation_uid,
                     word_translation_in_context, grammar_context, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
                params![
                    word_row_uid.to_string(),
                    sentence_uid.to_string(),
                    word_order as u32,
                    word.original,
                    word.is_punctuation,
                    word.is_standalone_punctuation,
                    word.is_opening_parenthesis,
                    word.is_closing_parenthesis,
                    word_translation_uid.map(|u| u.to_string()),
                    in_context,
                    grammar,
                    ts
                ],
            )?;
            tx.record(ChangeEvent::insert(Table::SentenceWordTranslations, word_row_uid));
        }
    }

    let queued = tx.select_many(
        "SELECT uid FROM translation_queue WHERE paragraph_uid = ?1 AND language = ?2",
        params![paragraph_uid.to_string(), target_code],
        |row| uid_at(row, 0),
    )?;
    delete_rows(tx, Table::TranslationQueue, &queued)?;

    tx.execute(
        "UPDATE paragraphs SET updated_at = ?1 WHERE uid = ?2",
        params![ts, paragraph_uid.to_string()],
    )?;
    tx.record(ChangeEvent::update(Table::Paragraphs, *paragraph_uid));

    tx.execute(
        "UPDATE books SET translated_paragraphs = (
            SELECT COUNT(DISTINCT p.uid) FROM paragraphs p
            JOIN paragraph_translations pt ON pt.paragraph_uid = p.uid
            WHERE p.book_uid = ?1
         ), updated_at = ?2
         WHERE uid = ?1",
        params![book_uid.to_string(), ts],
    )?;
    tx.record(ChangeEvent::update(Table::Books, book_uid));

    Ok(Some(translation_uid))
}

// ---------------------------------------------------------------------------
// Durable translation queue
// ---------------------------------------------------------------------------

/// Record a pending job. Returns false when the paragraph no longer exists,
/// already has a translation in that language, or is already queued. The
/// stored book is always the paragraph's own book, whatever the caller passed.
pub fn enqueue_translation(tx: &mut Tx<'_>, job: &QueuedJob) -> Result<bool, StoreError> {
    let language = normalize_language_code(&job.language);
    let owner: Option<String> = tx.select_one(
        "SELECT p.book_uid FROM paragraphs p
         WHERE p.uid = ?1 AND NOT EXISTS (
             SELECT 1 FROM paragraph_translations pt
             JOIN languages l ON l.uid = pt.language_uid
             WHERE pt.paragraph_uid = p.uid AND l.code = ?2
         )",
        params![job.paragraph_uid.to_string(), language],
        |row| row.get(0),
    )?;
    let Some(book_uid) = owner else {
        return Ok(false);
    };
    if book_uid != job.book_uid.to_string() {
        tracing::debug!(
            paragraph = %job.paragraph_uid,
            claimed = %job.book_uid,
            book = %book_uid,
            "queued job filed under the paragraph's own book"
        );
    }
    let uid = new_uid();
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO translation_queue (uid, paragraph_uid, book_uid, language, model, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            uid.to_string(),
            job.paragraph_uid.to_string(),
            book_uid,
            language,
            job.model,
            now()
        ],
    )?;
    if inserted == 0 {
        return Ok(false);
    }
    tx.record(ChangeEvent::insert(Table::TranslationQueue, uid));
    Ok(true)
}

pub fn list_queued_jobs(conn: &Connection) -> Result<Vec<QueuedJob>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT paragraph_uid, book_uid, language, model FROM translation_queue
         ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(QueuedJob {
            paragraph_uid: uid_at(row, 0)?,
            book_uid: uid_at(row, 1)?,
            language: row.get(2)?,
            model: row.get(3)?,
        })
    })?;
    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(row?);
    }
    Ok(jobs)
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn list_books(conn: &Connection) -> Result<Vec<Book>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {BOOK_COLUMNS} FROM books ORDER BY title COLLATE NOCASE ASC, uid ASC"
    ))?;
    let rows = stmt.query_map([], book_from_row)?;
    collect(rows)
}

pub fn get_book(conn: &Connection, book_uid: &Ulid) -> Result<Option<Book>, StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT {BOOK_COLUMNS} FROM books WHERE uid = ?1"))?;
    let mut rows = stmt.query_map(params![book_uid.to_string()], book_from_row)?;
    rows.next().transpose().map_err(StoreError::from)
}

pub fn list_chapters(conn: &Connection, book_uid: &Ulid) -> Result<Vec<Chapter>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE book_uid = ?1 ORDER BY sort_order ASC"
    ))?;
    let rows = stmt.query_map(params![book_uid.to_string()], chapter_from_row)?;
    collect(rows)
}

pub fn list_paragraphs(conn: &Connection, chapter_uid: &Ulid) -> Result<Vec<Paragraph>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARAGRAPH_COLUMNS} FROM paragraphs p WHERE p.chapter_uid = ?1 ORDER BY p.sort_order ASC"
    ))?;
    let rows = stmt.query_map(params![chapter_uid.to_string()], paragraph_from_row)?;
    collect(rows)
}

pub fn get_paragraph(conn: &Connection, paragraph_uid: &Ulid) -> Result<Option<Paragraph>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARAGRAPH_COLUMNS} FROM paragraphs p WHERE p.uid = ?1"
    ))?;
    let mut rows = stmt.query_map(params![paragraph_uid.to_string()], paragraph_from_row)?;
    rows.next().transpose().map_err(StoreError::from)
}

/// Paragraphs of a book with no translation into `language`, in reading order.
pub fn list_untranslated_paragraphs(
    conn: &Connection,
    book_uid: &Ulid,
    language: &str,
) -> Result<Vec<Paragraph>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {PARAGRAPH_COLUMNS} FROM paragraphs p
         JOIN chapters c ON c.uid = p.chapter_uid
         WHERE p.book_uid = ?1
           AND NOT EXISTS (
               SELECT 1 FROM paragraph_translations pt
               JOIN languages l ON l.uid = pt.language_uid
               WHERE pt.paragraph_uid = p.uid AND l.code = ?2
           )
         ORDER BY c.sort_order ASC, p.sort_order ASC"
    ))?;
    let rows = stmt.query_map(
        params![book_uid.to_string(), normalize_language_code(language)],
        paragraph_from_row,
    )?;
    collect(rows)
}

/// The full translation tree of a paragraph in one language.
pub fn get_paragraph_translation(
    conn: &Connection,
    paragraph_uid: &Ulid,
    language: &str,
) -> Result<Option<ParagraphTranslationTree>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT pt.uid, pt.paragraph_uid, pt.language_uid, l.code, pt.translating_model,
                pt.created_at, pt.updated_at
         FROM paragraph_translations pt
         JOIN languages l ON l.uid = pt.language_uid
         WHERE pt.paragraph_uid = ?1 AND l.code = ?2",
    )?;
    let mut rows = stmt.query_map(
        params![paragraph_uid.to_string(), normalize_language_code(language)],
        |row| {
            Ok(ParagraphTranslation {
                uid: uid_at(row, 0)?,
                paragraph_uid: uid_at(row, 1)?,
                language_uid: uid_at(row, 2)?,
                language_code: row.get(3)?,
                translating_model: row.get(4)?,
                created_at: ts_at(row, 5)?,
                updated_at: ts_at(row, 6)?,
            })
        },
    )?;
    let Some(translation) = rows.next().transpose()? else {
        return Ok(None);
    };

    let mut sentence_stmt = conn.prepare(
        "SELECT uid, paragraph_translation_uid, sort_order, full_translation, created_at, updated_at
         FROM sentence_translations WHERE paragraph_translation_uid = ?1
         ORDER BY sort_order ASC",
    )?;
    let sentence_rows = sentence_stmt.query_map(params![translation.uid.to_string()], |row| {
        Ok(SentenceTranslation {
            uid: uid_at(row, 0)?,
            paragraph_translation_uid: uid_at(row, 1)?,
            order: row.get(2)?,
            full_translation: row.get(3)?,
            created_at: ts_at(row, 4)?,
            updated_at: ts_at(row, 5)?,
        })
    })?;
    let sentences = collect(sentence_rows)?;

    let mut word_stmt = conn.prepare(
        "SELECT uid, sentence_uid, sort_order, original, is_punctuation, is_standalone_punctuation,
                is_opening_parenthesis, is_closing_parenthesis, word_translation_uid,
                word_translation_in_context, grammar_context, created_at, updated_at
         FROM sentence_word_translations WHERE sentence_uid = ?1
         ORDER BY sort_order ASC",
    )?;
    let mut trees = Vec::with_capacity(sentences.len());
    for sentence in sentences {
        let word_rows = word_stmt.query_map(params![sentence.uid.to_string()], sentence_word_from_row)?;
        let words = collect(word_rows)?;
        trees.push(SentenceTree { sentence, words });
    }

    Ok(Some(ParagraphTranslationTree {
        translation,
        sentences: trees,
    }))
}

/// Dictionary lookup of a surface form in its original language.
pub fn lookup_word(
    conn: &Connection,
    language: &str,
    word: &str,
) -> Result<Option<DictionaryEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT w.uid, w.original_language_uid, w.original, w.original_normalized, w.created_at, w.updated_at
         FROM words w JOIN languages l ON l.uid = w.original_language_uid
         WHERE l.code = ?1 AND w.original_normalized = ?2",
    )?;
    let mut rows = stmt.query_map(
        params![normalize_language_code(language), normalize_word(word)],
        word_from_row,
    )?;
    let Some(word) = rows.next().transpose()? else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT uid, language_uid, original_word_uid, translation, translation_normalized, created_at, updated_at
         FROM word_translations WHERE original_word_uid = ?1
         ORDER BY created_at ASC, uid ASC",
    )?;
    let rows = stmt.query_map(params![word.uid.to_string()], word_translation_from_row)?;
    let translations = collect(rows)?;
    Ok(Some(DictionaryEntry { word, translations }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::Database;
    use folio_core::model::{NewChapter, NewParagraph};
    use folio_core::translation::TranslatedSentence;

    fn migrated() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        db.apply_migrations().unwrap();
        db
    }

    fn sample_book() -> NewBook {
        NewBook {
            title: "Sample".to_string(),
            path: Vec::new(),
            chapters: vec![
                NewChapter {
                    title: Some("One".to_string()),
                    paragraphs: vec![
                        NewParagraph::plain("Hello world."),
                        NewParagraph::plain("Goodbye."),
                    ],
                },
                NewChapter {
                    title: None,
                    paragraphs: vec![NewParagraph::plain("The end.")],
                },
            ],
        }
    }

    fn hello_response(full: &str) -> TranslationResponse {
        TranslationResponse {
            source_language: "en".to_string(),
            target_language: "es".to_string(),
            sentences: vec![TranslatedSentence {
                full_translation: full.to_string(),
                words: vec![
                    TranslatedWord::word("Hello", "Hola"),
                    TranslatedWord::word("world", "mundo"),
                    TranslatedWord::punctuation("."),
                ],
            }],
        }
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.select_one(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
            .unwrap()
    }

    fn first_paragraph(db: &Database, book_uid: &Ulid) -> Paragraph {
        let chapters = list_chapters(db.conn(), book_uid).unwrap();
        list_paragraphs(db.conn(), &chapters[0].uid).unwrap().remove(0)
    }

    #[test]
    fn create_book_inserts_tree_with_parent_first_events() {
        let mut db = migrated();
        let committed = db.transaction(|tx| create_book(tx, &sample_book())).unwrap();
        let book_uid = committed.value;

        assert_eq!(committed.events[0], ChangeEvent::insert(Table::Books, book_uid));
        assert_eq!(committed.events[1].table, Table::Chapters);
        assert_eq!(committed.events.len(), 1 + 2 + 3);

        let book = get_book(db.conn(), &book_uid).unwrap().unwrap();
        assert_eq!(book.paragraph_count, 3);
        assert!(book.path.is_empty());

        let chapters = list_chapters(db.conn(), &book_uid).unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].order, 0);
        assert_eq!(chapters[0].title.as_deref(), Some("One"));
        let paragraphs = list_paragraphs(db.conn(), &chapters[0].uid).unwrap();
        assert_eq!(paragraphs[1].original_text, "Goodbye.");
        assert_eq!(paragraphs[1].order, 1);
    }

    #[test]
    fn translation_write_replaces_previous_translation() {
        let mut db = migrated();
        let book_uid = db.transaction(|tx| create_book(tx, &sample_book())).unwrap().value;
        let paragraph = first_paragraph(&db, &book_uid);

        db.transaction(|tx| {
            update_paragraph_translation(tx, &paragraph.uid, "m1", &hello_response("Hola mundo."))
        })
        .unwrap();
        db.transaction(|tx| {
            update_paragraph_translation(tx, &paragraph.uid, "m2", &hello_response("¡Hola, mundo!"))
        })
        .unwrap();

        assert_eq!(count(&db, "paragraph_translations"), 1);
        assert_eq!(count(&db, "sentence_translations"), 1);
        assert_eq!(count(&db, "sentence_word_translations"), 3);

        let tree = get_paragraph_translation(db.conn(), &paragraph.uid, "ES")
            .unwrap()
            .unwrap();
        assert_eq!(tree.translation.translating_model, "m2");
        assert_eq!(tree.sentences[0].sentence.full_translation, "¡Hola, mundo!");
        assert!(tree.sentences[0].words[2].is_punctuation);
        assert!(tree.sentences[0].words[2].word_translation_uid.is_none());
        assert_eq!(
            tree.sentences[0].words[0].word_translation_in_context,
            vec!["Hola".to_string()]
        );

        let book = get_book(db.conn(), &book_uid).unwrap().unwrap();
        assert_eq!(book.translated_paragraphs, 1);
    }

    #[test]
    fn dictionary_rows_are_deduplicated() {
        let mut db = migrated();
        db.transaction(|tx| {
            let en = get_or_insert_language(tx, "EN")?;
            assert_eq!(get_or_insert_language(tx, " en ")?, en);
            let es = get_or_insert_language(tx, "es")?;

            let word = get_or_insert_word(tx, &en, "Hello")?;
            assert_eq!(get_or_insert_word(tx, &en, "hello")?, word);
            assert_eq!(get_or_insert_word(tx, &en, " HELLO ")?, word);

            let wt = get_or_insert_word_translation(tx, &es, &word, "Hola")?;
            assert_eq!(get_or_insert_word_translation(tx, &es, &word, "hola")?, wt);
            Ok::<_, StoreError>(())
        })
        .unwrap();

        assert_eq!(count(&db, "languages"), 2);
        assert_eq!(count(&db, "words"), 1);
        assert_eq!(count(&db, "word_translations"), 1);

        let entry = lookup_word(db.conn(), "en", "HeLLo").unwrap().unwrap();
        assert_eq!(entry.word.original, "Hello");
        assert_eq!(entry.translations.len(), 1);
        assert_eq!(entry.translations[0].translation, "Hola");
    }

    #[test]
    fn translation_of_missing_paragraph_is_inert() {
        let mut db = migrated();
        let committed = db
            .transaction(|tx| {
                update_paragraph_translation(tx, &Ulid::new(), "m", &hello_response("Hola mundo."))
            })
            .unwrap();
        assert!(committed.value.is_none());
        assert!(committed.events.is_empty());
        assert_eq!(count(&db, "paragraph_translations"), 0);
        assert_eq!(count(&db, "languages"), 0);
    }

    #[test]
    fn delete_book_cascades_deepest_first_and_keeps_dictionary() {
        let mut db = migrated();
        let book_uid = db.transaction(|tx| create_book(tx, &sample_book())).unwrap().value;
        let paragraph = first_paragraph(&db, &book_uid);
        db.transaction(|tx| {
            update_paragraph_translation(tx, &paragraph.uid, "m", &hello_response("Hola mundo."))
        })
        .unwrap();
        db.transaction(|tx| {
            enqueue_translation(
                tx,
                &QueuedJob {
                    paragraph_uid: paragraph.uid,
                    book_uid,
                    language: "fr".to_string(),
                    model: "m".to_string(),
                },
            )
        })
        .unwrap();

        let committed = db.transaction(|tx| delete_book(tx, &book_uid)).unwrap();
        assert_eq!(committed.value, Some(book_uid));

        let order: Vec<Table> = committed.events.iter().map(|e| e.table).collect();
        let position = |table: Table| order.iter().position(|t| *t == table).unwrap();
        assert!(position(Table::SentenceWordTranslations) < position(Table::SentenceTranslations));
        assert!(position(Table::SentenceTranslations) < position(Table::ParagraphTranslations));
        assert!(position(Table::ParagraphTranslations) < position(Table::TranslationQueue));
        assert!(position(Table::TranslationQueue) < position(Table::Paragraphs));
        assert!(position(Table::Paragraphs) < position(Table::Chapters));
        assert_eq!(*order.last().unwrap(), Table::Books);

        for table in [
            "books",
            "chapters",
            "paragraphs",
            "paragraph_translations",
            "sentence_translations",
            "sentence_word_translations",
            "translation_queue",
        ] {
            assert_eq!(count(&db, table), 0, "{table} should be empty");
        }
        assert_eq!(count(&db, "words"), 2);
        assert_eq!(count(&db, "word_translations"), 2);
    }

    #[test]
    fn enqueue_is_unique_per_paragraph_and_language() {
        let mut db = migrated();
        let book_uid = db.transaction(|tx| create_book(tx, &sample_book())).unwrap().value;
        let paragraph = first_paragraph(&db, &book_uid);
        let job = QueuedJob {
            paragraph_uid: paragraph.uid,
            book_uid,
            language: "es".to_string(),
            model: "m".to_string(),
        };

        assert!(db.transaction(|tx| enqueue_translation(tx, &job)).unwrap().value);
        assert!(!db.transaction(|tx| enqueue_translation(tx, &job)).unwrap().value);
        assert_eq!(list_queued_jobs(db.conn()).unwrap(), vec![job.clone()]);

        // A successful translation clears the queue entry.
        db.transaction(|tx| {
            update_paragraph_translation(tx, &paragraph.uid, "m", &hello_response("Hola mundo."))
        })
        .unwrap();
        assert!(list_queued_jobs(db.conn()).unwrap().is_empty());
        // Translated paragraphs are not queued again in that language.
        assert!(!db.transaction(|tx| enqueue_translation(tx, &job)).unwrap().value);
        let french = QueuedJob {
            language: "FR".to_string(),
            ..job
        };
        assert!(db.transaction(|tx| enqueue_translation(tx, &french)).unwrap().value);
    }

    #[test]
    fn queued_job_for_another_book_does_not_block_delete() {
        let mut db = migrated();
        let book_a = db.transaction(|tx| create_book(tx, &sample_book())).unwrap().value;
        let book_b = db.transaction(|tx| create_book(tx, &sample_book())).unwrap().value;
        let paragraph = first_paragraph(&db, &book_a);
        let mislabeled = QueuedJob {
            paragraph_uid: paragraph.uid,
            book_uid: book_b,
            language: "es".to_string(),
            model: "m".to_string(),
        };

        assert!(db.transaction(|tx| enqueue_translation(tx, &mislabeled)).unwrap().value);
        let queued = list_queued_jobs(db.conn()).unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].book_uid, book_a);

        let committed = db.transaction(|tx| delete_book(tx, &book_a)).unwrap();
        assert_eq!(committed.value, Some(book_a));
        assert_eq!(count(&db, "translation_queue"), 0);
        assert_eq!(count(&db, "books"), 1);
        assert!(get_book(db.conn(), &book_b).unwrap().is_some());
    }

    #[test]
    fn untranslated_paragraphs_follow_reading_order() {
        let mut db = migrated();
        let book_uid = db.transaction(|tx| create_book(tx, &sample_book())).unwrap().value;
        let paragraph = first_paragraph(&db, &book_uid);

        let before = list_untranslated_paragraphs(db.conn(), &book_uid, "es").unwrap();
        assert_eq!(
            before.iter().map(|p| p.original_text.as_str()).collect::<Vec<_>>(),
            vec!["Hello world.", "Goodbye.", "The end."]
        );

        db.transaction(|tx| {
            update_paragraph_translation(tx, &paragraph.uid, "m", &hello_response("Hola mundo."))
        })
        .unwrap();
        let after = list_untranslated_paragraphs(db.conn(), &book_uid, "es").unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(list_untranslated_paragraphs(db.conn(), &book_uid, "fr").unwrap().len(), 3);
    }

    #[test]
    fn moving_a_book_normalizes_root_paths() {
        let mut db = migrated();
        let book_uid = db.transaction(|tx| create_book(tx, &sample_book())).unwrap().value;
        let path = vec!["Fiction".to_string(), "Sci-Fi".to_string()];

        db.transaction(|tx| update_book_path(tx, &book_uid, &path)).unwrap();
        assert_eq!(get_book(db.conn(), &book_uid).unwrap().unwrap().path, path);

        db.transaction(|tx| update_book_path(tx, &book_uid, &[String::new()])).unwrap();
        let raw: Option<String> = db
            .select_one(
                "SELECT path FROM books WHERE uid = ?1",
                params![book_uid.to_string()],
                |row| row.get(0),
            )
            .unwrap()
            .unwrap();
        assert!(raw.is_none());

        let missing = db
            .transaction(|tx| update_book_path(tx, &Ulid::new(), &path))
            .unwrap();
        assert!(missing.value.is_none());
    }
}
