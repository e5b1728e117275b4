use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod api;
mod cli;
mod config;
mod error;
mod fetcher;
mod lookup;
mod models;
mod scheduler;
mod store;
mod utils;

#[cfg(test)]
mod testutil;

use cli::Cli;
use config::Config;
use models::AppState;
use scheduler::RefreshScheduler;
use store::DatabaseStore;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize environment
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command-line arguments
    let cli = Cli::parse();

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return Err(std::io::Error::other(e.to_string()));
        }
    };

    let store = Arc::new(DatabaseStore::open(&config).await);

    // Start the refresh loop; it runs until shutdown is signalled
    let shutdown = CancellationToken::new();
    let scheduler = RefreshScheduler::from_config(store.clone(), &config)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    let refresh_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    let app = api::router(AppState::new(store));
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!("Server started at http://{}", listener.local_addr()?);

    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await;

    // The server may also stop on its own; make sure the refresh loop follows
    shutdown.cancel();

    tracing::info!("Waiting for background tasks to complete...");
    match tokio::time::timeout(Duration::from_secs(5), refresh_handle).await {
        Ok(Ok(())) => tracing::debug!("Refresh task completed"),
        Ok(Err(e)) => tracing::warn!("Refresh task ended with error: {}", e),
        Err(_) => tracing::warn!("Refresh task did not complete within timeout"),
    }

    tracing::info!("Shutdown complete");
    server_result
}

/// Resolve on Ctrl-C or SIGTERM and cancel background work
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Error handling shutdown signal: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!("Error installing SIGTERM handler: {}", err);
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

    tracing::info!("Received shutdown signal, beginning graceful shutdown...");
    shutdown.cancel();
}
