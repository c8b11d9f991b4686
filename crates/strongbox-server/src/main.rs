use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use strongbox_server::{api, AppState, ServerConfig};
use strongbox_store::Pool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,strongbox_server=debug")),
        )
        .init();

    info!("Starting Strongbox server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        addr = %config.http_addr,
        database = %config.database_path.display(),
        tls = config.tls_paths().is_some(),
        public_paths = config.allow_endpoints.values().filter(|allowed| **allowed).count(),
        "Loaded configuration"
    );

    if config.tls_paths().is_some()
        && rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
    {
        tracing::warn!("rustls crypto provider already installed");
    }

    // -----------------------------------------------------------------------
    // 3. Open the database (migrations run before any call is accepted)
    // -----------------------------------------------------------------------
    let pool = Arc::new(Pool::open(&config.database_path)?);
    let purge_interval = config.session_purge_interval;
    let orphan_max_age = config.orphan_blob_max_age;
    let state = AppState::new(Arc::clone(&pool), config);
    let engine = state.engine.clone();

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic purge of expired sessions and abandoned uploads
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_interval);
        loop {
            interval.tick().await;
            let pool = Arc::clone(&pool);
            let purged = tokio::task::spawn_blocking(move || {
                pool.get().and_then(|db| db.purge_expired_sessions())
            })
            .await;
            match purged {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => info!(removed = n, "Purged expired sessions"),
                Ok(Err(e)) => tracing::warn!(error = %e, "Session purge failed"),
                Err(e) => tracing::warn!(error = %e, "Session purge task failed"),
            }

            let engine = engine.clone();
            let purged =
                tokio::task::spawn_blocking(move || engine.purge_orphans(orphan_max_age)).await;
            match purged {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Orphan blob purge failed"),
                Err(e) => tracing::warn!(error = %e, "Orphan blob purge task failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "API server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
