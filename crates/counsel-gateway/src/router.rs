use axum::Router;
use axum::extract::State;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;
use crate::ws;

/// Build the application router.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route("/api/status", get(status))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health() -> &'static str {
    "ok"
}

async fn status(State(state): State<SharedState>) -> axum::Json<serde_json::Value> {
    let uptime = chrono::Utc::now() - state.started_at;

    axum::Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "provider": state.runtime.provider_id(),
        "default_model": state.defaults.model,
        "sessions": state.runtime.history().active_sessions(),
        "connections": state.open_connections(),
        "uptime_secs": uptime.num_seconds(),
    }))
}
