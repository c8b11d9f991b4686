//! Per-call authentication gate.
//!
//! A call whose path is allow-listed with `true` passes untouched. Every
//! other call must carry `authorization` (session token) and `useruid`
//! metadata that match a live session; the admitted caller is attached to
//! the request as a [`Caller`]. Nothing is remembered between calls.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use strongbox_shared::constants::{AUTHORIZATION_HEADER, USER_UID_HEADER};
use strongbox_shared::types::UserId;
use strongbox_store::Pool;

use crate::error::ServerError;

/// Answers "is this token a live session of this user". Must not fail:
/// any lookup problem is a `false`.
pub trait SessionLookup: Send + Sync + 'static {
    fn verify(&self, user_id: &UserId, token: &str) -> bool;
}

impl SessionLookup for Pool {
    fn verify(&self, user_id: &UserId, token: &str) -> bool {
        match self.get() {
            Ok(db) => db.verify_session(user_id, token),
            Err(e) => {
                tracing::warn!(error = %e, "no connection for session lookup");
                false
            }
        }
    }
}

/// The authenticated identity of the current call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
}

#[derive(Clone)]
pub struct AuthGate {
    allow: Arc<HashMap<String, bool>>,
    sessions: Arc<dyn SessionLookup>,
}

impl AuthGate {
    pub fn new(allow: HashMap<String, bool>, sessions: Arc<dyn SessionLookup>) -> Self {
        Self {
            allow: Arc::new(allow),
            sessions,
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.allow.get(path).copied().unwrap_or(false)
    }

    /// Resolve the call metadata to a caller, or `None`.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Option<Caller> {
        let token = header_str(headers, AUTHORIZATION_HEADER)?;
        let user_id = UserId::parse(header_str(headers, USER_UID_HEADER)?).ok()?;

        let sessions = Arc::clone(&self.sessions);
        let token = token.to_owned();
        let valid = tokio::task::spawn_blocking(move || sessions.verify(&user_id, &token))
            .await
            .unwrap_or(false);

        valid.then_some(Caller { user_id })
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub async fn auth_middleware(
    State(gate): State<AuthGate>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();
    if gate.is_public(&path) {
        return next.run(req).await;
    }

    match gate.authenticate(req.headers()).await {
        Some(caller) => {
            tracing::debug!(method = %path, user = %caller.user_id, "call admitted");
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        None => {
            tracing::debug!(method = %path, "unauthenticated call rejected");
            ServerError::Unauthenticated.into_response()
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Caller>()
            .copied()
            .ok_or(ServerError::Unauthenticated)
    }
}
