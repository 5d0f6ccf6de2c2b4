//! Listener and middleware stack

use anyhow::{Context, Result};
use axum::http::Method;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::auth::AuthState;
use super::handlers::AppState;
use super::routes::create_router;
use crate::service::{ExtractionService, ShutdownReason, wait_for_shutdown};

/// Serve until a signal or a memory restart, returning which one it was
///
/// # Errors
///
/// Fails if the listener cannot bind or the server errors.
pub async fn serve(service: Arc<ExtractionService>) -> Result<ShutdownReason> {
    let server = &service.config().server;
    if server.api_secret.is_none() {
        warn!("API_SECRET is not set; scraping endpoints are unauthenticated");
    }

    let auth_state = AuthState::new(server.api_secret.clone());
    let mut app = create_router(
        AppState {
            service: Arc::clone(&service),
        },
        auth_state,
    );

    if server.cors_enabled {
        let cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
            .allow_origin(Any);
        app = app.layer(cors);
    }
    app = app.layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", server.listen_addr))?;
    info!("Listening on http://{}", server.listen_addr);

    let (reason_tx, reason_rx) = oneshot::channel();
    let shutdown_service = Arc::clone(&service);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = wait_for_shutdown(shutdown_service).await;
            let _ = reason_tx.send(reason);
        })
        .await
        .context("HTTP server error")?;

    Ok(reason_rx.await.unwrap_or(ShutdownReason::Signal))
}
