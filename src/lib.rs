// Public API for integration tests and potential library usage

pub mod abuse;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod state;
pub mod store;
pub mod types;
pub mod validate;
pub mod ws;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::AppState;

/// Build the full application router: realtime gateway plus the poll API
pub fn router(state: Arc<AppState>, client_url: &str) -> Router {
    let cors = match client_url.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers(Any),
        Err(e) => {
            tracing::warn!(client_url, "Invalid CLIENT_URL ({}), allowing any origin", e);
            CorsLayer::permissive()
        }
    };

    Router::new()
        .route("/", get(api::index))
        .route("/ws", get(ws::ws_handler))
        .route("/api/polls", get(api::list_polls).post(api::create_poll))
        .route("/api/polls/{id}", get(api::get_poll))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
