//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method},
    response::Json,
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::session::SessionPhase;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CLIENT_ORIGIN may list several origins, comma-separated
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub phase: SessionPhase,
    pub tick: u64,
    pub seated: usize,
    pub capacity: usize,
    pub connections: usize,
    pub views_sent: u64,
    pub views_suppressed: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.session.status();

    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        phase: status.phase,
        tick: status.tick,
        seated: status.seated,
        capacity: status.capacity,
        connections: state.bus.connection_count(),
        views_sent: status.views_sent,
        views_suppressed: status.views_suppressed,
    })
}
