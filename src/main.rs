use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livepoll::{
    abuse::{self, AbuseConfig},
    config::ServerConfig,
    state::AppState,
    store::{InMemoryPollStore, SnapshotFile},
};

/// How long open WebSocket connections get to wind down on shutdown
const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "livepoll=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting livepoll...");

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let abuse_config = AbuseConfig::from_env();

    let store = Arc::new(InMemoryPollStore::new());
    let snapshot = match config.snapshot_path {
        Some(ref path) => match SnapshotFile::load(path, &store).await {
            Ok((file, _)) => Some(file),
            Err(e) => {
                // Starting empty would overwrite the file on shutdown
                tracing::error!(path = %path.display(), "Failed to load poll snapshot: {}", e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let state = Arc::new(AppState::with_abuse_config(store.clone(), &abuse_config));

    // Periodically forget origins whose attempts have all aged out
    let sweeper = abuse_config.rate_limiter.clone().map(|limiter| {
        abuse::spawn_sweeper(limiter, abuse_config.sweep_interval, state.shutdown.clone())
    });

    let app = livepoll::router(state.clone(), &config.client_url);

    tracing::info!("Listening on http://{}", config.addr);

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.addr, e);
            std::process::exit(1);
        }
    };

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    // Upgraded sockets outlive axum's graceful shutdown; drain them before saving
    if tokio::time::timeout(CLOSE_GRACE, state.close_connections())
        .await
        .is_err()
    {
        tracing::warn!("WebSocket connections still open after {:?}", CLOSE_GRACE);
    }
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    if let Some(ref file) = snapshot {
        if let Err(e) = file.save(&store).await {
            tracing::error!(path = %file.path().display(), "Failed to save poll snapshot: {}", e);
        }
    }

    if let Err(e) = served {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
