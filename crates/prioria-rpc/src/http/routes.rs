use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    get_block, get_chain, get_entry, get_entry_proof, get_mempool, get_status, get_validators,
    p2p_message, submit_entry, AppState,
};

/// Create the HTTP router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(get_status))
        .route("/chain", get(get_chain))
        .route("/block/{index}", get(get_block))
        .route("/entry", post(submit_entry))
        .route("/entry/{id}", get(get_entry))
        .route("/entry/{id}/proof", get(get_entry_proof))
        .route("/mempool", get(get_mempool))
        .route("/validators", get(get_validators))
        .route("/p2p/message", post(p2p_message))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
