use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use strongbox_shared::types::UserId;

use crate::database::Database;
use crate::error::{conflict, not_found, Result, StoreError};
use crate::models::{timestamp_column, uuid_column, Session, User};
use crate::password;
use crate::sessions::insert_session;

impl Database {
    /// Insert a new account. A taken login yields [`StoreError::AlreadyExists`].
    pub fn create_user(&self, login: &str, password_hash: &str) -> Result<UserId> {
        insert_user(self.conn(), login, password_hash)
    }

    /// Create the account and its first session atomically.
    pub fn register_user(
        &mut self,
        login: &str,
        password_hash: &str,
        session_ttl: chrono::Duration,
    ) -> Result<Session> {
        let tx = self.begin()?;
        let user_id = insert_user(&tx, login, password_hash)?;
        let session = insert_session(&tx, user_id, session_ttl)?;
        tx.commit()?;

        tracing::info!(user = %user_id, "registered user");
        Ok(session)
    }

    pub fn user_exists(&self, login: &str) -> Result<bool> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE login = ?1)",
            params![login],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    pub fn get_user_by_login(&self, login: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, login, password_hash, created_at FROM users WHERE login = ?1",
                params![login],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Check a login/password pair and return the account id.
    ///
    /// An unknown login and a wrong password both yield
    /// [`StoreError::InvalidCredentials`], and both pay for one hash
    /// verification.
    pub fn verify_credentials(&self, login: &str, password: &str) -> Result<UserId> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, login, password_hash, created_at FROM users WHERE login = ?1",
                params![login],
                row_to_user,
            )
            .optional()?;

        match user {
            Some(user) => {
                if password::verify_password(password, &user.password_hash)? {
                    Ok(user.id)
                } else {
                    Err(StoreError::InvalidCredentials)
                }
            }
            None => {
                password::burn_dummy_verification(password);
                Err(StoreError::InvalidCredentials)
            }
        }
    }
}

fn insert_user(conn: &Connection, login: &str, password_hash: &str) -> Result<UserId> {
    let id = UserId::new();
    conn.execute(
        "INSERT INTO users (id, login, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            id.to_string(),
            login,
            password_hash,
            Utc::now().to_rfc3339()
        ],
    )
    .map_err(conflict)?;
    Ok(id)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let login: String = row.get(1)?;
    let password_hash: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(User {
        id: UserId(uuid_column(0, &id_str)?),
        login,
        password_hash,
        created_at: timestamp_column(3, &created_str)?,
    })
}
