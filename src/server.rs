//! Listener and graceful shutdown shared by both run modes

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn serve(address: SocketAddr, app: Router, role: &'static str) -> Result<(), AnyError> {
    let listener = TcpListener::bind(address).await?;
    info!(%address, role, "MediaPeek listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(role, "Server stopped");
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received");
}
