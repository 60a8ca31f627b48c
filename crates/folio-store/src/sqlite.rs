// ABOUTME: Storage engine owning the single writable SQLite handle for the library.
// ABOUTME: Provides migrations, parameterized statements, and transactions that collect change events.

use std::path::Path;

use folio_core::change::ChangeEvent;
use rusqlite::{Connection, OptionalExtension, Params, Row};
use thiserror::Error;

use crate::migrations::{self, MIGRATIONS};

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration {id} ({name}) failed: {source}")]
    Migration {
        id: u32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid translation: {0}")]
    InvalidTranslation(String),
}

/// The single writable database handle. Exactly one execution context owns
/// it; everyone else reaches it through the bridge.
pub struct Database {
    conn: Connection,
}

/// Result of a committed transaction: the body's value plus every change
/// event the body recorded, in recording order.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<ChangeEvent>,
}

impl Database {
    /// Open or create a database file. Migrations are not applied here; call
    /// `apply_migrations` before serving requests.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::configure(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn })
    }

    /// Apply all registered migrations the ledger has not yet recorded.
    pub fn apply_migrations(&mut self) -> Result<Vec<u32>, StoreError> {
        migrations::apply(&mut self.conn, MIGRATIONS)
    }

    /// Run `body` inside a transaction. The body's `Tx` is only usable for
    /// the duration of the call and cannot open another transaction. An
    /// error from the body rolls everything back and is returned unchanged.
    pub fn transaction<T, E, F>(&mut self, body: F) -> Result<Committed<T>, E>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let inner = self.conn.transaction().map_err(StoreError::from)?;
        let mut tx = Tx {
            inner,
            events: Vec::new(),
        };
        let value = body(&mut tx)?;
        let Tx { inner, events } = tx;
        inner.commit().map_err(StoreError::from)?;
        Ok(Committed { value, events })
    }

    /// Execute a single statement outside an explicit transaction.
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, StoreError> {
        Ok(self.conn.execute(sql, params)?)
    }

    pub fn select_one<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Option<T>, StoreError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        select_one(&self.conn, sql, params, map)
    }

    pub fn select_many<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>, StoreError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        select_many(&self.conn, sql, params, map)
    }
}

/// A live transaction. Statements run against it either all commit or all
/// roll back; change events recorded here are released only on commit.
pub struct Tx<'conn> {
    inner: rusqlite::Transaction<'conn>,
    events: Vec<ChangeEvent>,
}

impl Tx<'_> {
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> Result<usize, StoreError> {
        Ok(self.inner.execute(sql, params)?)
    }

    pub fn select_one<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Option<T>, StoreError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        select_one(&self.inner, sql, params, map)
    }

    pub fn select_many<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>, StoreError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        select_many(&self.inner, sql, params, map)
    }

    /// Record a row mutation to publish once the transaction commits.
    pub fn record(&mut self, event: ChangeEvent) {
        self.events.push(event);
    }

    /// Read-only access to the connection, for the shared read queries.
    pub fn conn(&self) -> &Connection {
        &self.inner
    }
}

fn select_one<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Option<T>, StoreError>
where
    P: Params,
    F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
{
    Ok(conn.query_row(sql, params, map).optional()?)
}

fn select_many<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> Result<Vec<T>, StoreError>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

impl Database {
    /// Connection for read queries shared with `Tx`.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}
