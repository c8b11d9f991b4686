//! # strongbox-store
//!
//! SQLite persistence for the Strongbox vault: accounts and sessions,
//! growable blob containers addressed by handle, and the catalog that maps
//! record ids to blobs.
//!
//! Everything is synchronous. Callers on an async runtime run store work on
//! a blocking thread with a connection taken from a [`Pool`].

pub mod blobs;
pub mod database;
pub mod migrations;
pub mod models;
pub mod password;
pub mod pool;
pub mod records;
pub mod sessions;
pub mod users;

mod error;

pub use blobs::{BlobFd, BlobGuard, BlobMode, Blobs};
pub use database::Database;
pub use error::{BlobError, Result, StoreError};
pub use models::*;
pub use pool::{Pool, PooledDatabase};
pub use records::Catalog;
pub use rusqlite::Transaction;
