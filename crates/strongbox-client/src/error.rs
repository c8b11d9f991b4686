use thiserror::Error;

use strongbox_shared::{CryptoError, ProtocolError, RecordKind};

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server could not be reached, or the connection broke.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with an error.
    #[error("{code}: {message}")]
    Rpc { code: String, message: String },

    /// Sealing or opening a sensitive value failed (usually a wrong key).
    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("An encryption key is required for {0} records")]
    MissingKey(RecordKind),

    #[error("Not logged in")]
    NotLoggedIn,

    /// The CA file held no PEM certificate.
    #[error("No certificates found in CA bundle")]
    EmptyCaBundle,
}

impl ClientError {
    /// Error code reported by the server, if this is a server-side error.
    pub fn rpc_code(&self) -> Option<&str> {
        match self {
            ClientError::Rpc { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
