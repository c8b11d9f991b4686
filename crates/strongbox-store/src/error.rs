use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A unique constraint rejected the insert.
    #[error("Already exists")]
    AlreadyExists,

    /// Unknown login or wrong password; deliberately indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),

    /// Password hashing or hash parsing failed.
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// Blob descriptor misuse or I/O mismatch.
    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    /// No pooled connection became free before the checkout timeout.
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

/// Errors specific to blob descriptors.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Blob {0} does not exist")]
    NotFound(i64),

    #[error("Blob {0} cannot be spliced onto itself")]
    SpliceIntoSelf(i64),

    /// The sink accepted fewer bytes than offered.
    #[error("Short write: offered {expected} bytes, stored {written}")]
    ShortWrite { expected: usize, written: usize },

    #[error("Descriptor for blob {0} is closed")]
    Closed(i64),

    #[error("Descriptor for blob {0} is read-only")]
    ReadOnly(i64),

    /// Writes only append; rewriting requires a truncate first.
    #[error("Write at position {position} but content length is {length}")]
    NonSequentialWrite { position: u64, length: u64 },

    #[error("Cannot truncate to {requested} bytes, content length is {length}")]
    InvalidTruncate { requested: u64, length: u64 },

    /// Stored length disagrees with what the descriptor wrote.
    #[error("Blob {handle} holds {stored} bytes, descriptor expected {expected}")]
    LengthMismatch {
        handle: i64,
        stored: u64,
        expected: u64,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Map "no rows" to [`StoreError::NotFound`].
pub(crate) fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a unique-constraint failure to [`StoreError::AlreadyExists`].
pub(crate) fn conflict(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            StoreError::AlreadyExists
        }
        other => StoreError::Sqlite(other),
    }
}
