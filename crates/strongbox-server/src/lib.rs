//! # strongbox-server
//!
//! RPC server for the Strongbox vault. Every method is an HTTP `POST` to its
//! fully-qualified path; uploads and downloads are streams of
//! length-prefixed frames.
//!
//! - [`auth`]: the per-call session gate and the [`auth::Caller`] extractor
//! - [`engine`]: transactional create/update/read/delete over the blob store
//!   and record catalog
//! - [`stream`]: body framing and the channels that feed the engine
//! - [`api`]: routes, handlers and the listener

pub mod accounts;
pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod stream;

pub use api::{build_router, AppState};
pub use config::ServerConfig;
pub use error::ServerError;
