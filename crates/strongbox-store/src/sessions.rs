//! Session tokens: issue, verify, purge.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, Connection};

use strongbox_shared::constants::SESSION_TOKEN_BYTES;
use strongbox_shared::types::UserId;

use crate::database::Database;
use crate::error::{conflict, Result};
use crate::models::Session;

/// 256 bits from the OS RNG, URL-safe base64 without padding.
pub fn generate_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

impl Database {
    /// Store a fresh token for `user_id`, valid for `ttl`.
    pub fn issue_session(&self, user_id: UserId, ttl: Duration) -> Result<Session> {
        insert_session(self.conn(), user_id, ttl)
    }

    /// True only if `token` was issued to `user_id` and has not expired.
    ///
    /// Lookup failures are logged and answered with `false`.
    pub fn verify_session(&self, user_id: &UserId, token: &str) -> bool {
        let now = Utc::now().timestamp();
        let found = self.conn().query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sessions
                WHERE user_id = ?1 AND token = ?2 AND expires_at > ?3
            )",
            params![user_id.to_string(), token, now],
            |row| row.get::<_, bool>(0),
        );

        match found {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(user = %user_id, error = %e, "session lookup failed");
                false
            }
        }
    }

    /// Delete every expired session. Returns how many were removed.
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            params![Utc::now().timestamp()],
        )?;
        Ok(removed)
    }
}

pub(crate) fn insert_session(conn: &Connection, user_id: UserId, ttl: Duration) -> Result<Session> {
    let created_at = Utc::now();
    let expires_at = created_at + ttl;
    let token = generate_token();

    conn.execute(
        "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            token,
            user_id.to_string(),
            created_at.to_rfc3339(),
            expires_at.timestamp()
        ],
    )
    .map_err(conflict)?;

    Ok(Session {
        user_id,
        token,
        created_at,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_user() -> (Database, UserId) {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_user("alice", "hash").unwrap();
        (db, id)
    }

    #[test]
    fn test_tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE_NO_PAD.decode(&a).unwrap().len(), SESSION_TOKEN_BYTES);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn test_issued_session_verifies_for_its_owner_only() {
        let (db, alice) = db_with_user();
        let bob = db.create_user("bob", "hash").unwrap();
        let session = db.issue_session(alice, Duration::minutes(20)).unwrap();

        assert!(db.verify_session(&alice, &session.token));
        assert!(!db.verify_session(&bob, &session.token));
        assert!(!db.verify_session(&alice, "forged"));
    }

    #[test]
    fn test_expired_session_is_rejected_and_purged() {
        let (db, alice) = db_with_user();
        let stale = db.issue_session(alice, Duration::seconds(-1)).unwrap();
        let live = db.issue_session(alice, Duration::minutes(20)).unwrap();

        assert!(!db.verify_session(&alice, &stale.token));
        assert_eq!(db.purge_expired_sessions().unwrap(), 1);
        assert!(db.verify_session(&alice, &live.token));
    }

    #[test]
    fn test_debug_output_hides_token() {
        let (db, alice) = db_with_user();
        let session = db.issue_session(alice, Duration::minutes(20)).unwrap();
        assert!(!format!("{session:?}").contains(&session.token));
    }
}
