//! WebSocket call-leg server: one `MixerEngine` per connected call.

pub mod app_state;
pub mod call;
pub mod health;

use std::sync::Arc;

use axum::{Router, routing::get};

pub use app_state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/call", get(call::call_handler))
        .route("/health", get(health::health))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
