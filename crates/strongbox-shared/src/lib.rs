//! # strongbox-shared
//!
//! Types shared by the Strongbox server and client: record identifiers and
//! kinds, the RPC message set with its length-prefixed framing, and the
//! symmetric envelope used for sensitive record types.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::{CryptoError, ProtocolError};
pub use types::{RecordId, RecordKind, UserId};
