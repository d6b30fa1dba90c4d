//! `serve` command: runs the connect service until interrupted.

use anyhow::Context;
use tokio::net::TcpListener;

use crate::config::Config;
use crate::error::Result;
use crate::server::{self, AppState};

/// Binds `server.bind` and serves the connect routes.
///
/// Returns once a shutdown signal has been received and in-flight requests
/// have drained.
pub async fn run_serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let providers: Vec<String> = state.flow.providers().map(|p| p.to_string()).collect();

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;

    tracing::info!(
        address = %listener.local_addr()?,
        providers = %providers.join(","),
        default_provider = %state.flow.default_provider(),
        "Listening for connections"
    );

    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for SIGINT");
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
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => (),
        _ = terminate => (),
    }
    tracing::info!("Shutdown signal received, shutting down server gracefully");
}
