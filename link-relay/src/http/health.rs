//! Health check endpoint.
//!
//! Probes the link store on every call: a relay that cannot reach its store
//! still accepts connections but loses every message, so it reports
//! `degraded` with 503.

use crate::relay::LinkRelay;
use axum::{http::StatusCode, Extension, Json};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Global start time for uptime calculation.
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize the start time (call once at startup).
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok`, or `degraded` when the store is unreachable.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Number of live connections.
    pub connections: usize,
    /// Number of identities with a live connection.
    pub identities: usize,
    /// Envelopes waiting on the bus for a session to pick them up.
    pub pending_envelopes: usize,
    /// Stored links, absent when the store did not answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_links: Option<u64>,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

/// Health check handler.
pub async fn health_handler(
    Extension(relay): Extension<Arc<LinkRelay>>,
) -> (StatusCode, Json<HealthStatus>) {
    let uptime = START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    let stored_links = match relay.store().count().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::error!("Health check: link store unavailable: {}", e);
            None
        }
    };
    let (code, status) = match stored_links {
        Some(_) => (StatusCode::OK, "ok"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "degraded"),
    };

    (
        code,
        Json(HealthStatus {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            connections: relay.total_connections(),
            identities: relay.total_identities(),
            pending_envelopes: relay.bus().pending_envelopes(),
            stored_links,
            uptime_seconds: uptime,
        }),
    )
}
