use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use strongbox_shared::protocol::ErrorBody;
use strongbox_shared::ProtocolError;
use strongbox_store::StoreError;

use crate::engine::EngineError;

/// Outcome of a failed RPC, as the caller sees it.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Missing, malformed or unknown session. Never says which.
    #[error("unauthenticated")]
    Unauthenticated,

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Unauthenticated => "unauthenticated",
            ServerError::PermissionDenied(_) => "permission_denied",
            ServerError::InvalidArgument(_) => "invalid_argument",
            ServerError::NotFound(_) => "not_found",
            ServerError::AlreadyExists(_) => "already_exists",
            ServerError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            ServerError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::AlreadyExists(_) => StatusCode::CONFLICT,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if let ServerError::Internal(ref message) = self {
            tracing::error!(error = %message, "internal error");
        }

        let body = ErrorBody {
            code: self.code().to_string(),
            error: self.to_string(),
        };

        (self.status(), axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("record not found".into()),
            StoreError::AlreadyExists => ServerError::AlreadyExists("already exists".into()),
            StoreError::InvalidCredentials => ServerError::PermissionDenied("login failed".into()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ServerError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NoData | EngineError::NothingToUpdate | EngineError::InvalidArgument(_) => {
                ServerError::InvalidArgument(e.to_string())
            }
            EngineError::PermissionDenied(_) => ServerError::PermissionDenied(e.to_string()),
            EngineError::NotFound => ServerError::NotFound(e.to_string()),
            EngineError::Cancelled => ServerError::InvalidArgument(e.to_string()),
            EngineError::Store(inner) => inner.into(),
            EngineError::ChunkWrite { .. } | EngineError::Worker(_) => {
                ServerError::Internal(e.to_string())
            }
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        ServerError::InvalidArgument(format!("malformed stream: {e}"))
    }
}
