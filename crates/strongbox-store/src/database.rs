//! Database connection management.
//!
//! A [`Database`] wraps either a connection it owns (single-connection use
//! and tests) or one checked out of a [`crate::Pool`]. Either way the
//! connection has been configured by [`configure`] and the schema is
//! migrated before any other operation.

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::Result;
use crate::migrations;

/// How long a connection waits for another writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

enum Handle {
    Owned(Connection),
    Pooled(PooledConnection<SqliteConnectionManager>),
}

impl Deref for Handle {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Handle::Owned(conn) => conn,
            Handle::Pooled(conn) => &**conn,
        }
    }
}

impl DerefMut for Handle {
    fn deref_mut(&mut self) -> &mut Connection {
        match self {
            Handle::Owned(conn) => conn,
            Handle::Pooled(conn) => &mut **conn,
        }
    }
}

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Handle,
}

impl Database {
    /// Open (or create) a database at an explicit path and bring its schema
    /// up to date.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        configure(&conn)?;

        // Run schema migrations.
        migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Handle::Owned(conn),
        })
    }

    /// Private in-memory database, migrated. Useful for single-connection
    /// tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        configure(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Handle::Owned(conn),
        })
    }

    pub(crate) fn pooled(conn: PooledConnection<SqliteConnectionManager>) -> Self {
        Self {
            conn: Handle::Pooled(conn),
        }
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Start a write transaction.
    ///
    /// The write lock is taken up front (`BEGIN IMMEDIATE`), so a second
    /// writer waits on the busy timeout instead of failing when it tries to
    /// upgrade a read lock. Keep these short: every other writer queues
    /// behind them.
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Start a read transaction (snapshot isolation under WAL).
    pub fn begin_read(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

/// Per-connection settings. The busy timeout goes first so the WAL switch
/// itself waits for a concurrent opener.
pub(crate) fn configure(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
