//! # strongbox-client
//!
//! Client for a Strongbox vault server. Password and card values are sealed
//! locally before upload; the server only ever stores ciphertext for them.
//! Files are streamed in chunks in both directions.

pub mod client;
pub mod error;
pub mod transfer;
pub mod values;

pub use client::{SessionInfo, VaultClient};
pub use error::{ClientError, Result};
pub use values::{CardDetails, Credentials, Payload, Retrieved};
