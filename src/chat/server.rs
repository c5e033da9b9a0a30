use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::api::{self, AppState};
use super::db::{SessionStore, StoreHandle};
use super::orchestrator::TurnOrchestrator;
use super::relay::OpenAiRelay;
use crate::config::Settings;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let mut app = api::api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if dev_mode {
        app = app.layer(CorsLayer::permissive());
    }
    app
}

/// Open (creating if needed) and migrate the session database.
pub fn open_store(db_path: &std::path::Path) -> Result<SessionStore> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    SessionStore::open(db_path).context("Failed to initialize session database")
}

/// Start the relay server and run until SIGINT/SIGTERM.
pub async fn start_server(settings: Settings) -> Result<()> {
    let api_key = settings.api_key()?;

    let store = open_store(&settings.server.db_path)?;
    let relay = OpenAiRelay::new(&settings.completion, api_key).context("Failed to build completion client")?;

    let state = Arc::new(AppState {
        orchestrator: TurnOrchestrator::new(StoreHandle::new(store), Arc::new(relay)),
    });
    let app = build_router(state, settings.server.dev);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(
        addr = %local_addr,
        model = %settings.completion.model,
        db_path = %settings.server.db_path.display(),
        dev = settings.server.dev,
        "chat-relay listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("chat-relay stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received, draining connections");
}
