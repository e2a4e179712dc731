//! WebSocket session transport and server assembly.
//!
//! Each connected session gets a dedicated writer task draining an ordered
//! event queue, a processing lock serializing turns, and an approval broker
//! bridging tool-approval round-trips. Message rows are persisted around
//! each turn.

mod config;
mod error;
mod state;
mod ws;

pub mod protocol;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use state::AppState;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the server router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/sessions/{session_id}/stream", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Minimal operational surface: version and model status.
async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let model = state.model_manager.current_config().await;
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": state.config.version,
        "model": model,
    }))
}

/// Serve until the listener fails.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(addr.to_string(), e.to_string()))?;
    tracing::info!(%addr, "Server listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))?;
    Ok(())
}
