//! HTTP API for the relay.

mod handlers;
mod types;

pub use handlers::*;
pub use types::*;

use crate::relay::RelayService;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
}

impl AppState {
    pub fn new(relay: RelayService) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/chat/send-message", post(handlers::send_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
