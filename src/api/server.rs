use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tracing::info;

use super::services::{cancel_job, get_job, health, list_jobs, submit_job};
use super::state::AppState;
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use crate::sink::LogSink;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub async fn run(address: Option<SocketAddr>) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("Failed to load config: {}", e))?;
    let address = address.unwrap_or(config.server.bind_addr);

    let orchestrator = Orchestrator::start(&config, Arc::new(LogSink)).await?;
    let app = router(AppState::new(Arc::clone(&orchestrator)));

    let listener = TcpListener::bind(address).await?;
    info!(%address, "mediafetch API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.shutdown();

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{job_id}", get(get_job).delete(cancel_job))
        .route("/health", get(health))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
