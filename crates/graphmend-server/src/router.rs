//! Router assembly for the graphmend HTTP API.
//!
//! [`build_router`] wires all handler functions to their routes with
//! CORS and tracing middleware layers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Builds the complete axum router with all API routes.
///
/// Routes use axum 0.8 `/{param}` path syntax.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Query API
        .route(
            "/sessions",
            get(handlers::sessions::list_sessions).post(handlers::sessions::submit_session),
        )
        .route("/sessions/{id}", get(handlers::sessions::session_status))
        .route(
            "/sessions/{id}/result",
            get(handlers::sessions::session_result),
        )
        .route(
            "/sessions/{id}/cancel",
            post(handlers::sessions::cancel_session),
        )
        // Ingestion boundary
        .route("/graph/nodes", post(handlers::graph::upsert_nodes))
        .route("/graph/edges", post(handlers::graph::upsert_edges))
        .route("/graph/stats", get(handlers::graph::graph_stats))
        // Debug memory
        .route("/memory/decay", post(handlers::memory::run_decay))
        .route(
            "/memory/patterns/match",
            post(handlers::memory::match_patterns),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
