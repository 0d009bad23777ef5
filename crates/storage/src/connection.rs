//! The connection layer (spec §4.4): opens the embedded store, applies a
//! pragma preset, and exposes `query`/`run`/`transaction` primitives over
//! the raw connection.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rusqlite::{Connection, Row};
use tracing::{info, warn};

use tgdb_core::{TgdbError, TgdbResult};

use crate::pragma::{self, PragmaConfig, PragmaPreset};

/// A single embedded-store connection (spec §4.4).
///
/// Wraps a `rusqlite::Connection` behind a mutex: this engine is
/// single-writer per database file (spec §1 non-goals), and serializing
/// access here lets every caller share one handle without juggling
/// `rusqlite`'s own connection-per-thread conventions.
pub struct StoreConnection {
    inner: Mutex<Connection>,
    closed: AtomicBool,
}

impl StoreConnection {
    /// Open (or create) a file-backed store at `path` with the given
    /// pragma preset.
    pub fn open_file(path: impl AsRef<Path>, preset: PragmaPreset) -> TgdbResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(TgdbError::from)?;
        let config = preset.config();
        pragma::apply(&conn, &config)?;
        info!(path = %path.as_ref().display(), preset = ?preset, "opened store connection");
        Ok(StoreConnection {
            inner: Mutex::new(conn),
            closed: AtomicBool::new(false),
        })
    }

    /// Open an in-memory store. Always uses the `Memory` pragma preset
    /// regardless of the caller's request, since file-oriented knobs
    /// (WAL, mmap) do not apply.
    pub fn open_memory() -> TgdbResult<Self> {
        let conn = Connection::open_in_memory().map_err(TgdbError::from)?;
        pragma::apply(&conn, &PragmaPreset::Memory.config())?;
        info!("opened in-memory store connection");
        Ok(StoreConnection {
            inner: Mutex::new(conn),
            closed: AtomicBool::new(false),
        })
    }

    /// Re-apply a pragma configuration, e.g. to switch into
    /// `HighPerformance` mode for a bulk ingest session.
    pub fn retune(&self, config: &PragmaConfig) -> TgdbResult<()> {
        self.ensure_open()?;
        pragma::apply(&self.inner.lock(), config)
    }

    /// Run a read query, mapping each returned row with `f`.
    pub fn query<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        mut f: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> TgdbResult<Vec<T>> {
        self.ensure_open()?;
        let conn = self.inner.lock();
        let mut stmt = conn.prepare(sql).map_err(TgdbError::from)?;
        let rows = stmt
            .query_map(params, |row| f(row))
            .map_err(TgdbError::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(TgdbError::from)?);
        }
        Ok(out)
    }

    /// Run a single write statement, returning rows changed.
    pub fn run(&self, sql: &str, params: impl rusqlite::Params) -> TgdbResult<RunOutcome> {
        self.ensure_open()?;
        let conn = self.inner.lock();
        conn.execute(sql, params).map_err(TgdbError::from)?;
        Ok(RunOutcome {
            changes: conn.changes() as i64,
            last_insert_rowid: conn.last_insert_rowid(),
        })
    }

    /// Run `body` inside a single-level transaction, committing on `Ok`
    /// and rolling back on `Err`. Nested scopes go through the
    /// transaction manager's savepoints, not through this primitive.
    pub fn transaction<T>(
        &self,
        body: impl FnOnce(&Connection) -> TgdbResult<T>,
    ) -> TgdbResult<T> {
        self.ensure_open()?;
        let mut conn = self.inner.lock();
        let tx = conn.transaction().map_err(TgdbError::from)?;
        let result = body(&tx);
        match result {
            Ok(value) => {
                tx.commit().map_err(TgdbError::from)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "rollback after failed transaction also failed");
                }
                Err(e)
            }
        }
    }

    /// Run `body` with direct access to the underlying raw connection,
    /// without opening a transaction. Used by higher layers (the
    /// transaction manager) that manage their own savepoint scopes.
    pub fn with_raw<T>(&self, body: impl FnOnce(&Connection) -> TgdbResult<T>) -> TgdbResult<T> {
        self.ensure_open()?;
        let conn = self.inner.lock();
        body(&conn)
    }

    /// Idempotent close. Subsequent operations fail fast with
    /// `TgdbError::Internal`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// `true` once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> TgdbResult<()> {
        if self.is_closed() {
            Err(TgdbError::internal("operation on closed store connection"))
        } else {
            Ok(())
        }
    }
}

/// The outcome of a [`StoreConnection::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Rows affected by the statement.
    pub changes: i64,
    /// `rowid` of the last successful insert, if any.
    pub last_insert_rowid: i64,
}
