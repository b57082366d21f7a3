//! HTTP endpoints for link-relay.
//!
//! Provides the WebSocket upgrade, the link endpoints used by web clients and
//! webhook adapters, health checks and metrics.

pub mod health;
pub mod links;
mod metrics;

use crate::relay::LinkRelay;
use axum::{
    routing::{delete, get},
    Extension, Router,
};
use std::sync::Arc;

pub use health::HealthStatus;
pub use links::{ApiResponse, LinkRef};

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<LinkRelay>) -> Router {
    Router::new()
        .route("/ws", get(links::ws_handler))
        .route(
            "/links",
            get(links::list_links)
                .post(links::create_link)
                .delete(links::delete_all_links),
        )
        .route("/links/:id", delete(links::delete_link))
        .route("/health", get(health::health_handler))
        .route("/metrics", get(metrics::metrics_handler))
        .layer(Extension(relay))
}
