//! Shift Server: distributed background job worker.
//!
//! Main entry point that wires the job store, progress cache, and handler
//! registry together and runs the job server until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{EnvFilter, fmt};

use shift_cache::{CacheManager, CachedJobProgress};
use shift_core::config::AppConfig;
use shift_core::error::AppError;
use shift_core::traits::PlaintextCipher;
use shift_worker::jobs::CommandHandler;
use shift_worker::{HandlerRegistry, JobServer};

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Load configuration from `config/` and the environment
fn load_configuration() -> Result<AppConfig, AppError> {
    let dir = std::env::var("SHIFT_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let env = std::env::var("SHIFT_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load_from(&dir, &env)
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        process_id = %config.server.process_id,
        "Starting Shift"
    );

    // ── Step 1: Job store ────────────────────────────────────────
    tracing::info!(provider = %config.database.provider, "Connecting to job store...");
    let store = shift_database::connect_store(&config.database).await?;

    // ── Step 2: Progress cache ───────────────────────────────────
    tracing::info!(provider = %config.cache.provider, "Initializing progress cache...");
    let cache = CacheManager::new(&config.cache).await?;
    let progress = Arc::new(CachedJobProgress::new(
        cache,
        Duration::from_secs(config.cache.progress_ttl_seconds),
    ));

    // ── Step 3: Handlers ─────────────────────────────────────────
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(CommandHandler::new()));

    if config.server.encryption_key.is_some() {
        tracing::warn!("server.encryption_key is set but job arguments are stored as plaintext");
    }

    // ── Step 4: Job server ───────────────────────────────────────
    let server = JobServer::new(
        &config.server,
        store,
        progress,
        registry,
        Arc::new(PlaintextCipher),
    )?;
    server.start().await;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown...");

    // ── Step 5: Graceful shutdown ────────────────────────────────
    server.shutdown().await;
    tracing::info!("Shift server shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
