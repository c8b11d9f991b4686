//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use strongbox_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_SESSION_TTL_SECS, HEALTH_PATH, LOGIN_PATH,
    REGISTRATION_PATH,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API.
    /// Env: `STRONGBOX_HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `STRONGBOX_DATABASE`
    /// Default: `./strongbox.db`
    pub database_path: PathBuf,

    /// Method paths reachable without a session, and whether they are.
    /// Env: `STRONGBOX_ALLOW_ENDPOINTS` (`path=true,path=false`)
    /// Default: Login, Registration and the health check.
    pub allow_endpoints: HashMap<String, bool>,

    /// Lifetime of an issued session token.
    /// Env: `STRONGBOX_SESSION_TTL_SECS`
    /// Default: `1200`
    pub session_ttl: chrono::Duration,

    /// Largest single frame (or unary body) accepted.
    /// Env: `STRONGBOX_MAX_MESSAGE_SIZE`
    /// Default: 100 MiB
    pub max_message_size: usize,

    /// How long a streaming upload may go without delivering any bytes
    /// before it is cancelled. `0` disables the timeout.
    /// Env: `STRONGBOX_STREAM_IDLE_TIMEOUT_SECS`
    /// Default: `60`
    pub stream_idle_timeout: Option<Duration>,

    /// PEM certificate chain. HTTPS is served only if both cert and key are set.
    /// Env: `STRONGBOX_TLS_CERT`
    pub tls_cert: Option<PathBuf>,

    /// PEM private key.
    /// Env: `STRONGBOX_TLS_KEY`
    pub tls_key: Option<PathBuf>,

    /// Interval of the expired-session and orphan-blob purge.
    pub session_purge_interval: Duration,

    /// Uploads that never finished are reclaimed once their staging blob
    /// is older than this.
    /// Env: `STRONGBOX_ORPHAN_BLOB_MAX_AGE_SECS`
    /// Default: `86400`
    pub orphan_blob_max_age: chrono::Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./strongbox.db"),
            allow_endpoints: default_allow_endpoints(),
            session_ttl: chrono::Duration::seconds(DEFAULT_SESSION_TTL_SECS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            stream_idle_timeout: Some(Duration::from_secs(60)),
            tls_cert: None,
            tls_key: None,
            session_purge_interval: Duration::from_secs(300),
            orphan_blob_max_age: chrono::Duration::hours(24),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServerConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = lookup("STRONGBOX_HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid STRONGBOX_HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = lookup("STRONGBOX_DATABASE") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(list) = lookup("STRONGBOX_ALLOW_ENDPOINTS") {
            match parse_allow_list(&list) {
                Ok(parsed) => config.allow_endpoints = parsed,
                Err(e) => tracing::warn!(
                    error = %e,
                    "Invalid STRONGBOX_ALLOW_ENDPOINTS, using default"
                ),
            }
        }

        if let Some(val) = lookup("STRONGBOX_SESSION_TTL_SECS") {
            match val.parse::<i64>() {
                Ok(secs) if secs > 0 => config.session_ttl = chrono::Duration::seconds(secs),
                _ => tracing::warn!(value = %val, "Invalid STRONGBOX_SESSION_TTL_SECS, using default"),
            }
        }

        if let Some(val) = lookup("STRONGBOX_MAX_MESSAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_message_size = n,
                _ => tracing::warn!(value = %val, "Invalid STRONGBOX_MAX_MESSAGE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("STRONGBOX_STREAM_IDLE_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(0) => config.stream_idle_timeout = None,
                Ok(secs) => config.stream_idle_timeout = Some(Duration::from_secs(secs)),
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid STRONGBOX_STREAM_IDLE_TIMEOUT_SECS, using default"
                ),
            }
        }

        if let Some(val) = lookup("STRONGBOX_ORPHAN_BLOB_MAX_AGE_SECS") {
            match val.parse::<i64>() {
                Ok(secs) if secs > 0 => config.orphan_blob_max_age = chrono::Duration::seconds(secs),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid STRONGBOX_ORPHAN_BLOB_MAX_AGE_SECS, using default"
                ),
            }
        }

        config.tls_cert = lookup("STRONGBOX_TLS_CERT")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        config.tls_key = lookup("STRONGBOX_TLS_KEY")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        if config.tls_cert.is_some() != config.tls_key.is_some() {
            tracing::warn!("Only one of STRONGBOX_TLS_CERT / STRONGBOX_TLS_KEY is set, serving plain HTTP");
        }

        config
    }

    /// Certificate and key, if both are configured.
    pub fn tls_paths(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

pub fn default_allow_endpoints() -> HashMap<String, bool> {
    [LOGIN_PATH, REGISTRATION_PATH, HEALTH_PATH]
        .into_iter()
        .map(|path| (path.to_string(), true))
        .collect()
}

/// Parse `path=true,path=false`. Whitespace around entries is ignored.
fn parse_allow_list(raw: &str) -> Result<HashMap<String, bool>, String> {
    let mut out = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (path, allowed) = entry
            .split_once('=')
            .ok_or_else(|| format!("missing '=' in {entry:?}"))?;
        let allowed = allowed
            .trim()
            .parse::<bool>()
            .map_err(|_| format!("expected true/false in {entry:?}"))?;
        out.insert(path.trim().to_string(), allowed);
    }
    Ok(out)
}
