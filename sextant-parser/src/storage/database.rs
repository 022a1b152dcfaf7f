//! Shared DuckDB handle with re-entrant scoped transactions.

use anyhow::{Context, Result};
use duckdb::{params, Connection};
use parking_lot::ReentrantMutex;
use std::cell::Cell;
use std::path::{Path, PathBuf};

use super::schema::{SCHEMA_SQL, SCHEMA_VERSION};

struct Session {
    conn: Connection,
    /// Number of open `transaction` scopes on the owning thread.
    depth: Cell<u32>,
}

/// Workspace database shared by the scheduler, the collector, parsers and the
/// cluster engine.
///
/// All access goes through [`Database::transaction`]. The connection is
/// guarded by a re-entrant lock: a thread that already holds an open
/// transaction and asks for another one simply reuses it, so code that may run
/// both standalone and inside a caller's transaction never nests `BEGIN`.
pub struct Database {
    session: ReentrantMutex<Session>,
    path: Option<PathBuf>,
}

/// Scope of an open transaction. Typed queries live on this type.
pub struct Tx<'a> {
    pub(super) conn: &'a Connection,
}

impl Tx<'_> {
    /// Raw connection, for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        self.conn
    }
}

impl Database {
    /// Open or create a workspace database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION],
        )
        .context("Failed to set schema version")?;

        Ok(Self {
            session: ReentrantMutex::new(Session {
                conn,
                depth: Cell::new(0),
            }),
            path,
        })
    }

    /// Location of the database file, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the current thread has an open transaction on this database.
    pub fn in_transaction(&self) -> bool {
        match self.session.try_lock() {
            Some(session) => session.depth.get() > 0,
            None => false,
        }
    }

    /// Run `f` inside a transaction.
    ///
    /// The outermost scope on a thread issues `BEGIN`, then `COMMIT` when `f`
    /// returns `Ok` and `ROLLBACK` when it returns `Err` or unwinds. Inner
    /// scopes on the same thread join the open transaction. Other threads
    /// block until the outermost scope ends.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Tx<'_>) -> Result<T>,
    {
        let guard = self.session.lock();
        let session: &Session = &guard;

        let outermost = session.depth.get() == 0;
        if outermost {
            session
                .conn
                .execute_batch("BEGIN TRANSACTION")
                .context("Failed to begin transaction")?;
        }
        session.depth.set(session.depth.get() + 1);
        let mut scope = Scope {
            session,
            outermost,
            committed: false,
        };

        let result = f(&Tx {
            conn: &session.conn,
        });

        if outermost && result.is_ok() {
            session
                .conn
                .execute_batch("COMMIT")
                .context("Failed to commit transaction")?;
            scope.committed = true;
        }
        drop(scope);
        result
    }
}

/// Closes one `transaction` level, rolling back an unfinished outermost one.
struct Scope<'a> {
    session: &'a Session,
    outermost: bool,
    committed: bool,
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        self.session.depth.set(self.session.depth.get() - 1);
        if self.outermost && !self.committed {
            if let Err(e) = self.session.conn.execute_batch("ROLLBACK") {
                tracing::warn!("Rollback failed: {}", e);
            }
        }
    }
}

/// `?, ?, ?` placeholder list for an `IN (...)` clause.
pub(super) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
