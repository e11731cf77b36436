//! HTTP surface of the tracking store.
//!
//! Serves the campaign tracking API that [`crate::store::HttpStore`] talks to
//! and an inbound reply webhook that correlates pushed messages immediately.

pub mod api;
pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};

pub use handlers::{
    health, inbound_webhook, mark_replied, register, stats, track_send, AppState,
};
pub use signature::{is_signature_verification_enabled, verify_signature};

pub const INBOUND_WEBHOOK_PATH: &str = "/webhooks/inbound";

/// Build the application router. Callers add their own layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(&format!("/{}", api::TRACK_SEND_PATH), post(track_send))
        .route(&format!("/{}", api::REGISTER_PATH), post(register))
        .route(&format!("/{}", api::MARK_REPLIED_PATH), post(mark_replied))
        .route(&format!("/{}", api::STATS_PATH), get(stats))
        .route(INBOUND_WEBHOOK_PATH, post(inbound_webhook))
        .with_state(state)
}
