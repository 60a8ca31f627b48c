// ABOUTME: Ordered, idempotent schema migrations recorded in a `migrations` ledger table.
// ABOUTME: Each step runs in its own transaction and is skipped when the ledger already lists its id.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::sqlite::StoreError;

/// One schema step, keyed by a stable id that must never be reused.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub id: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// The registered migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        id: 1,
        name: "library",
        sql: "CREATE TABLE books (
                uid TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                path TEXT,
                paragraph_count INTEGER NOT NULL DEFAULT 0,
                translated_paragraphs INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE chapters (
                uid TEXT PRIMARY KEY,
                book_uid TEXT NOT NULL REFERENCES books(uid),
                sort_order INTEGER NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (book_uid, sort_order)
            );

            CREATE TABLE paragraphs (
                uid TEXT PRIMARY KEY,
                chapter_uid TEXT NOT NULL REFERENCES chapters(uid),
                book_uid TEXT NOT NULL REFERENCES books(uid),
                sort_order INTEGER NOT NULL,
                original_text TEXT NOT NULL,
                original_html TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (chapter_uid, sort_order)
            );",
    },
    Migration {
        id: 2,
        name: "dictionary",
        sql: "CREATE TABLE languages (
                uid TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE words (
                uid TEXT PRIMARY KEY,
                original_language_uid TEXT NOT NULL REFERENCES languages(uid),
                original TEXT NOT NULL,
                original_normalized TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (original_language_uid, original_normalized)
            );

            CREATE TABLE word_translations (
                uid TEXT PRIMARY KEY,
                language_uid TEXT NOT NULL REFERENCES languages(uid),
                original_word_uid TEXT NOT NULL REFERENCES words(uid),
                translation TEXT NOT NULL,
                translation_normalized TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (language_uid, original_word_uid, translation_normalized)
            );",
    },
    Migration {
        id: 3,
        name: "translations",
        sql: "CREATE TABLE paragraph_translations (
                uid TEXT PRIMARY KEY,
                paragraph_uid TEXT NOT NULL REFERENCES paragraphs(uid),
                language_uid TEXT NOT NULL REFERENCES languages(uid),
                translating_model TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE sentence_translations (
                uid TEXT PRIMARY KEY,
                paragraph_translation_uid TEXT NOT NULL REFERENCES paragraph_translations(uid),
                sort_order INTEGER NOT NULL,
                full_translation TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (paragraph_translation_uid, sort_order)
            );

            CREATE TABLE sentence_word_translations (
                uid TEXT PRIMARY KEY,
                sentence_uid TEXT NOT NULL REFERENCES sentence_translations(uid),
                sort_order INTEGER NOT NULL,
                original TEXT NOT NULL,
                is_punctuation INTEGER NOT NULL DEFAULT 0,
                is_standalone_punctuation INTEGER NOT NULL DEFAULT 0,
                is_opening_parenthesis INTEGER NOT NULL DEFAULT 0,
                is_closing_parenthesis INTEGER NOT NULL DEFAULT 0,
                word_translation_uid TEXT REFERENCES word_translations(uid),
                word_translation_in_context TEXT NOT NULL DEFAULT '[]',
                grammar_context TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (sentence_uid, sort_order)
            );",
    },
    Migration {
        id: 4,
        name: "translation_queue",
        sql: "CREATE TABLE translation_queue (
                uid TEXT PRIMARY KEY,
                paragraph_uid TEXT NOT NULL REFERENCES paragraphs(uid),
                book_uid TEXT NOT NULL REFERENCES books(uid),
                language TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (paragraph_uid, language)
            );",
    },
    Migration {
        id: 5,
        name: "lookup_indexes",
        sql: "CREATE INDEX idx_chapters_book ON chapters(book_uid);
            CREATE INDEX idx_paragraphs_book ON paragraphs(book_uid);
            CREATE INDEX idx_paragraphs_chapter ON paragraphs(chapter_uid);
            CREATE INDEX idx_paragraph_translations_paragraph
                ON paragraph_translations(paragraph_uid, language_uid);
            CREATE INDEX idx_sentence_translations_parent
                ON sentence_translations(paragraph_translation_uid);
            CREATE INDEX idx_sentence_words_sentence ON sentence_word_translations(sentence_uid);
            CREATE INDEX idx_translation_queue_book ON translation_queue(book_uid);",
    },
];

/// Apply every migration in `migrations` that the ledger has not recorded.
/// Returns the ids that ran in this call. The first failing step aborts the
/// run; steps committed before it stay recorded, so a rerun resumes there.
pub fn apply(conn: &mut Connection, migrations: &[Migration]) -> Result<Vec<u32>, StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )?;

    let mut applied = Vec::new();
    for migration in migrations {
        if run_step(conn, migration)? {
            tracing::info!(id = migration.id, name = migration.name, "applied migration");
            applied.push(migration.id);
        }
    }
    Ok(applied)
}

/// Run one step inside its own transaction. Returns false when already applied.
fn run_step(conn: &mut Connection, migration: &Migration) -> Result<bool, StoreError> {
    let wrap = |source: rusqlite::Error| StoreError::Migration {
        id: migration.id,
        name: migration.name,
        source,
    };

    let tx = conn.transaction().map_err(wrap)?;
    let already: Option<u32> = tx
        .query_row(
            "SELECT id FROM migrations WHERE id = ?1",
            params![migration.id],
            |row| row.get(0),
        )
        .optional()
        .map_err(wrap)?;
    if already.is_some() {
        return Ok(false);
    }

    tx.execute_batch(migration.sql).map_err(wrap)?;
    tx.execute(
        "INSERT INTO migrations (id, name, applied_at) VALUES (?1, ?2, ?3)",
        params![migration.id, migration.name, Utc::now().to_rfc3339()],
    )
    .map_err(wrap)?;
    tx.commit().map_err(wrap)?;
    Ok(true)
}

/// Ids recorded in the ledger, ascending.
pub fn applied_ids(conn: &Connection) -> Result<Vec<u32>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM migrations ORDER BY id ASC")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn applies_all_registered_migrations_in_order() {
        let mut conn = fresh();
        let applied = apply(&mut conn, MIGRATIONS).unwrap();
        assert_eq!(applied, vec![1, 2, 3, 4, 5]);
        assert_eq!(applied_ids(&conn).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn rerun_is_a_no_op() {
        let mut conn = fresh();
        apply(&mut conn, MIGRATIONS).unwrap();
        let second = apply(&mut conn, MIGRATIONS).unwrap();
        assert!(second.is_empty());
        assert_eq!(applied_ids(&conn).unwrap().len(), MIGRATIONS.len());
    }

    #[test]
    fn failing_step_aborts_and_resume_continues_after_fix() {
        let mut conn = fresh();
        let broken = [
            Migration {
                id: 1,
                name: "first",
                sql: "CREATE TABLE first_table (id INTEGER);",
            },
            Migration {
                id: 2,
                name: "broken",
                sql: "CREATE TABLE second_table (id INTEGER); THIS IS NOT SQL;",
            },
        ];

        let err = apply(&mut conn, &broken).unwrap_err();
        assert!(
            matches!(err, StoreError::Migration { id: 2, .. }),
            "expected migration 2 failure, got: {}",
            err
        );
        assert_eq!(applied_ids(&conn).unwrap(), vec![1]);

        // The failed step rolled back completely.
        let second_exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE name = 'second_table'",
                [],
                |row| row.get(0),
            )
            .optional()
            .unwrap();
        assert!(second_exists.is_none());

        let fixed = [
            broken[0],
            Migration {
                id: 2,
                name: "fixed",
                sql: "CREATE TABLE second_table (id INTEGER);",
            },
        ];
        assert_eq!(apply(&mut conn, &fixed).unwrap(), vec![2]);
        assert_eq!(applied_ids(&conn).unwrap(), vec![1, 2]);
    }
}
