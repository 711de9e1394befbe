//! MetaForge API - Metadata Versioning & Schema Evolution Service
//!
//! Versioning backbone for a metadata-driven application platform:
//! - Capture immutable, hashed snapshots of a project's designer metadata
//! - Diff snapshots by permanent identity, so renames never destroy data
//! - Evolve project databases with ordered, transactional DDL and
//!   soft-delete semantics for removals
//! - Keep pre-rename clients working via published-history name resolution

mod artifacts;
mod compat;
mod config;
mod db;
mod diff;
mod error;
mod evolution;
mod metadata;
mod normalize;
mod routes;
mod state;
mod versioning;

use crate::config::Settings;
use crate::routes::create_router;
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting MetaForge - Metadata Versioning & Schema Evolution Service...");

    let settings = Settings::load()?;
    info!("Configuration loaded successfully");

    let pool = match db::init_pool(&settings.database) {
        Ok(pool) => pool,
        Err(e) => {
            error!("FATAL: Failed to initialize metadata store pool: {}", e);
            return Err(anyhow::anyhow!(e.to_string()));
        }
    };

    db::bootstrap(&pool).await?;
    let state = Arc::new(AppState::new(pool));

    let app = create_router(state, &settings);
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("Server listening on http://{}", addr);
    info!("");
    info!("API Endpoints:");
    info!("   POST /api/projects/:id/snapshots?version=X       - Capture snapshot");
    info!("   GET  /api/projects/:id/snapshots                 - List snapshots");
    info!("   GET  /api/projects/:id/snapshots/latest          - Get the most recent snapshot");
    info!("   GET  /api/projects/:id/snapshots/:version        - Get one snapshot");
    info!("   GET  /api/artifacts/:id                          - Get one live artifact");
    info!("   POST /api/projects/:id/migrations/plan           - Compute migration plan");
    info!("   POST /api/projects/:id/migrations/apply?version=X&dry_run=true - Apply or dry-run");
    info!("   POST /api/projects/:id/normalize                 - Normalize a stale-named query");
    info!("   POST /api/projects/:id/results/virtualize        - Alias result rows with legacy names");
    info!("   GET  /api/projects/:id/compat/resolve            - Resolve a single name");
    info!("   GET  /api/projects/:id/compat/:entity            - Legacy result mappings");
    info!("");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,metaforge_api=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
