use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use homestead::api;
use homestead::auth::AuthService;
use homestead::config::{Config, DatabaseBackend};
use homestead::stats::StatsCache;
use homestead::storage::{PostgresStorage, SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env()?);
    info!("Loaded configuration");

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            Arc::new(
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
            )
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?,
            )
        }
    };

    info!("Initializing database...");
    storage.init().await.context("failed to initialize database schema")?;
    info!("Database initialized successfully");

    let auth_service = Arc::new(AuthService::new(&config.auth));
    if auth_service.is_enabled() {
        info!(
            "🔐 Admin routes require a bearer token ({} configured)",
            config.auth.admin_tokens.len()
        );
    } else {
        warn!("🔓 ADMIN_API_TOKENS is empty - admin routes are open to everyone");
    }

    // One cache slot for the dashboard aggregate, shared by every request
    let stats_cache = Arc::new(StatsCache::new(config.stats.cache_ttl()));
    info!(
        ttl_ms = config.stats.cache_ttl_ms,
        timezone_offset = %config.views.timezone_offset,
        "Dashboard stats cache ready"
    );

    let api_router = api::create_api_router(
        Arc::clone(&storage),
        auth_service,
        stats_cache,
        Arc::clone(&config),
    );

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind {}", api_addr))?;
    info!("🚀 API server listening on http://{}", api_addr);

    axum::serve(
        listener,
        api_router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
