//! Connection pool over one database file.
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so every concurrent
//! unit of work checks out its own connection. New connections get the
//! same pragmas as [`Database::open_at`] through the manager's init hook;
//! the schema is migrated once when the pool is built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2_sqlite::SqliteConnectionManager;

use crate::database::{self, Database};
use crate::error::Result;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;

/// A connection checked out of a [`Pool`]. It goes back when dropped.
pub type PooledDatabase = Database;

const DEFAULT_MAX_SIZE: u32 = 16;
const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Pool {
    path: PathBuf,
    inner: SqlitePool,
}

impl Pool {
    /// Open the database at `path`, migrating it, and build the pool.
    pub fn open(path: &Path) -> Result<Self> {
        Self::with_max_size(path, DEFAULT_MAX_SIZE, CHECKOUT_TIMEOUT)
    }

    pub fn with_max_size(path: &Path, max_size: u32, checkout_timeout: Duration) -> Result<Self> {
        // Creates the file and parent directory and runs the migrations.
        drop(Database::open_at(path)?);

        let manager = SqliteConnectionManager::file(path)
            .with_init(|c: &mut rusqlite::Connection| database::configure(c));
        let inner = r2d2::Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .connection_timeout(checkout_timeout)
            .build(manager)?;

        tracing::debug!(path = %path.display(), max_size, "connection pool ready");
        Ok(Self {
            path: path.to_path_buf(),
            inner,
        })
    }

    /// Check out a connection, waiting up to the checkout timeout.
    pub fn get(&self) -> Result<PooledDatabase> {
        Ok(Database::pooled(self.inner.get()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_size(&self) -> u32 {
        self.inner.max_size()
    }
}
