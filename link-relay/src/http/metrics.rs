//! Prometheus metrics endpoint.

use crate::relay::LinkRelay;
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format, or 404 when
/// `http.metrics_enabled` is off.
pub async fn metrics_handler(Extension(relay): Extension<Arc<LinkRelay>>) -> Response {
    if !relay.config().http.metrics_enabled {
        return StatusCode::NOT_FOUND.into_response();
    }

    let m = relay.metrics();

    // Gauges
    let connections = relay.total_connections();
    let identities = relay.total_identities();
    let pending = relay.bus().pending_envelopes();
    let limiter_keys = relay.rate_limits().message_keys_count();
    // Best effort: a store failure reports zero rather than failing the scrape.
    let stored = relay.store().count().await.unwrap_or(0);

    // Counters
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let frames_rx = m.frames_received.load(Ordering::Relaxed);
    let links_stored = m.links_stored.load(Ordering::Relaxed);
    let published = m.envelopes_published.load(Ordering::Relaxed);
    let delivered = m.frames_delivered.load(Ordering::Relaxed);
    let echo = m.self_echo_skipped.load(Ordering::Relaxed);
    let rate_limits = m.rate_limit_hits.load(Ordering::Relaxed);
    let errors = m.errors_total.load(Ordering::Relaxed);

    let body = format!(
        r#"# HELP link_relay_connections_active Number of live connections
# TYPE link_relay_connections_active gauge
link_relay_connections_active {connections}

# HELP link_relay_identities_active Number of identities with a live connection
# TYPE link_relay_identities_active gauge
link_relay_identities_active {identities}

# HELP link_relay_info Server information
# TYPE link_relay_info gauge
link_relay_info{{version="{version}"}} 1

# HELP link_relay_envelopes_pending Envelopes waiting on the bus
# TYPE link_relay_envelopes_pending gauge
link_relay_envelopes_pending {pending}

# HELP link_relay_links_stored Links currently in the database
# TYPE link_relay_links_stored gauge
link_relay_links_stored {stored}

# HELP link_relay_rate_limiter_keys Identities tracked by the rate limiter
# TYPE link_relay_rate_limiter_keys gauge
link_relay_rate_limiter_keys {limiter_keys}

# HELP link_relay_connections_total Total connections accepted
# TYPE link_relay_connections_total counter
link_relay_connections_total {conns_total}

# HELP link_relay_frames_received_total Total frames read from connections
# TYPE link_relay_frames_received_total counter
link_relay_frames_received_total {frames_rx}

# HELP link_relay_links_stored_total Total links written since startup
# TYPE link_relay_links_stored_total counter
link_relay_links_stored_total {links_stored}

# HELP link_relay_envelopes_published_total Total envelopes published on the bus
# TYPE link_relay_envelopes_published_total counter
link_relay_envelopes_published_total {published}

# HELP link_relay_frames_delivered_total Total frames delivered to connections
# TYPE link_relay_frames_delivered_total counter
link_relay_frames_delivered_total {delivered}

# HELP link_relay_self_echo_skipped_total Envelopes skipped by their origin session
# TYPE link_relay_self_echo_skipped_total counter
link_relay_self_echo_skipped_total {echo}

# HELP link_relay_rate_limit_hits_total Total rate limit rejections
# TYPE link_relay_rate_limit_hits_total counter
link_relay_rate_limit_hits_total {rate_limits}

# HELP link_relay_errors_total Total errors swallowed by relay loops
# TYPE link_relay_errors_total counter
link_relay_errors_total {errors}
"#,
        version = env!("CARGO_PKG_VERSION"),
    );

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
