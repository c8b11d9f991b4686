//! Registration and login on top of the session store.

use strongbox_store::password::hash_password;
use strongbox_store::{Pool, Session};

use crate::error::ServerError;

fn validate(login: &str, password: &str) -> Result<(), ServerError> {
    if login.trim().is_empty() {
        return Err(ServerError::InvalidArgument("login must not be empty".into()));
    }
    if password.is_empty() {
        return Err(ServerError::InvalidArgument("password must not be empty".into()));
    }
    Ok(())
}

/// Create an account and its first session.
pub fn register(
    pool: &Pool,
    login: &str,
    password: &str,
    ttl: chrono::Duration,
) -> Result<Session, ServerError> {
    validate(login, password)?;
    let hash = hash_password(password)?;
    let mut db = pool.get()?;
    Ok(db.register_user(login, &hash, ttl)?)
}

/// Check credentials and issue a new session.
///
/// Unknown login and wrong password both fail with the same
/// `PermissionDenied("login failed")`.
pub fn login(
    pool: &Pool,
    login: &str,
    password: &str,
    ttl: chrono::Duration,
) -> Result<Session, ServerError> {
    let db = pool.get()?;
    let user_id = db.verify_credentials(login, password).map_err(|e| {
        tracing::info!(login = %login, "login rejected");
        ServerError::from(e)
    })?;
    let session = db.issue_session(user_id, ttl)?;
    tracing::info!(user = %user_id, "login succeeded");
    Ok(session)
}
