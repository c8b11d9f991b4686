//! v001 -- Initial schema creation.
//!
//! Creates the account tables (`users`, `sessions`), the blob container
//! tables (`blobs`, `blob_pages`) and the record catalog (`user_data`).

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    login         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,              -- Argon2id PHC string
    created_at    TEXT NOT NULL               -- RFC-3339
);

-- ----------------------------------------------------------------
-- Sessions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sessions (
    token      TEXT PRIMARY KEY NOT NULL,     -- URL-safe base64, 256 bits
    user_id    TEXT NOT NULL,                 -- FK -> users(id)
    created_at TEXT NOT NULL,
    expires_at INTEGER NOT NULL,              -- unix seconds

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);

-- ----------------------------------------------------------------
-- Blobs (growable byte containers)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS blobs (
    handle     INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS blob_pages (
    handle    INTEGER NOT NULL,               -- FK -> blobs(handle)
    start_pos INTEGER NOT NULL,               -- byte offset of data[0]
    data      BLOB NOT NULL,

    PRIMARY KEY (handle, start_pos),
    FOREIGN KEY (handle) REFERENCES blobs(handle) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Record catalog
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_data (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    user_id     TEXT NOT NULL,                -- FK -> users(id)
    data_type   TEXT NOT NULL,
    data_name   TEXT NOT NULL,
    blob_handle INTEGER NOT NULL UNIQUE,      -- FK -> blobs(handle)
    created_at  TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (blob_handle) REFERENCES blobs(handle)
);

CREATE INDEX IF NOT EXISTS idx_user_data_user_id ON user_data(user_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
