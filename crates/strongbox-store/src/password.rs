//! Argon2id password hashes in PHC string form.

use std::sync::OnceLock;

use argon2::password_hash::{
    self, rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::{Result, StoreError};

/// Login used to derive the stand-in hash for unknown accounts.
const DUMMY_SECRET: &str = "strongbox-unknown-login";

fn argon2() -> Argon2<'static> {
    Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default())
}

fn hash_error(context: &str, e: password_hash::Error) -> StoreError {
    StoreError::PasswordHash(format!("{context}: {e}"))
}

/// Hash `password` under a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let phc = argon2()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| hash_error("hashing password", e))?;
    Ok(phc.to_string())
}

/// Check `password` against a stored PHC string. A malformed hash is an
/// error; a wrong password is `Ok(false)`.
pub fn verify_password(password: &str, phc: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc).map_err(|e| hash_error("parsing stored hash", e))?;
    match argon2().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(hash_error("verifying password", e)),
    }
}

/// A valid hash nobody can log in with.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| match hash_password(DUMMY_SECRET) {
            Ok(phc) => Some(phc),
            Err(e) => {
                tracing::warn!(error = %e, "could not derive dummy password hash");
                None
            }
        })
        .as_deref()
}

/// Spend one verification on an unknown login so it costs the same as a
/// wrong password. Always `false`.
pub(crate) fn burn_dummy_verification(password: &str) -> bool {
    burn_against(password, dummy_hash())
}

fn burn_against(password: &str, dummy: Option<&str>) -> bool {
    match dummy {
        Some(phc) => {
            let _ = verify_password(password, phc);
        }
        None => {
            tracing::warn!("no dummy hash available; unknown login answered without hashing");
        }
    }
    false
}
