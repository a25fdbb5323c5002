//! # wanderlist-server
//!
//! Collaboration server for Wanderlist groups.
//!
//! This binary provides:
//! - **REST API** (axum) for users, groups and the group wish history
//! - **Change feed** over WebSocket: every committed wish is pushed to the
//!   group's connected members as it lands
//! - **SQLite persistence** through `wanderlist-store`

mod api;
mod config;
mod error;

use std::time::Duration;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use wanderlist_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

/// How often idle per-group feed channels are dropped.
const FEED_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,wanderlist_server=debug")),
        )
        .init();

    info!("Starting Wanderlist server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the database (runs pending migrations)
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let http_addr = config.http_addr;
    let app_state = AppState::new(db, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    let feed = app_state.feed.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(FEED_PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            let pruned = feed.prune();
            if pruned > 0 {
                debug!(pruned, "Dropped idle feed channels");
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
