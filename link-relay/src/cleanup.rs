//! Background cleanup task.
//!
//! Runs periodically to purge bus envelopes no session has picked up within
//! `bus.envelope_ttl_secs` and to evict idle rate-limiter keys. Stored links
//! are never touched; they live until explicitly deleted.

use crate::config::CleanupConfig;
use crate::relay::LinkRelay;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    relay: Arc<LinkRelay>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs;
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_cleanup(&relay).await;
        }
    })
}

/// Run one cleanup pass. Returns the number of envelopes purged.
pub async fn run_cleanup(relay: &LinkRelay) -> usize {
    let ttl = Duration::from_secs(relay.config().bus.envelope_ttl_secs);

    let purged = relay.bus().purge_expired(ttl).await;
    if purged > 0 {
        tracing::info!("Cleanup: purged {} undelivered envelopes", purged);
    } else {
        tracing::debug!("Cleanup: no expired envelopes");
    }

    relay.rate_limits().shrink();
    purged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, MessageBus};
    use crate::config::Config;
    use crate::registry::ConnectionRegistry;
    use crate::store::SqliteLinkStore;
    use link_types::{Identity, SessionTag};

    async fn test_relay(envelope_ttl_secs: u64) -> (Arc<LinkRelay>, MemoryBus) {
        let mut config = Config::default();
        config.bus.envelope_ttl_secs = envelope_ttl_secs;
        let bus = MemoryBus::new();
        let relay = Arc::new(LinkRelay::new(
            config,
            Arc::new(SqliteLinkStore::in_memory().await.unwrap()),
            Arc::new(bus.clone()),
            Arc::new(ConnectionRegistry::new()),
        ));
        (relay, bus)
    }

    #[tokio::test]
    async fn cleanup_purges_expired_envelopes_but_keeps_links() {
        let (relay, bus) = test_relay(0).await;
        let alice = Identity::new("alice@example.com").unwrap();

        relay
            .publish(&alice, "nobody online", &SessionTag::new("whatsapp").unwrap())
            .await
            .unwrap();
        assert_eq!(bus.pending_envelopes(), 1);

        assert_eq!(run_cleanup(&relay).await, 1);
        assert_eq!(bus.pending_envelopes(), 0);
        assert_eq!(relay.list_for(&alice, "web").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_keeps_fresh_envelopes() {
        let (relay, bus) = test_relay(3600).await;
        let alice = Identity::new("alice@example.com").unwrap();

        relay
            .publish(&alice, "fresh", &SessionTag::new("whatsapp").unwrap())
            .await
            .unwrap();

        assert_eq!(run_cleanup(&relay).await, 0);
        assert_eq!(bus.pending_envelopes(), 1);
    }

    #[tokio::test]
    async fn cleanup_task_disabled() {
        let (relay, _bus) = test_relay(60).await;
        let config = CleanupConfig {
            interval_secs: 1,
            enabled: false,
        };

        let handle = spawn_cleanup_task(relay, config);

        // Task should complete immediately when disabled
        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("Task should complete when disabled")
            .expect("Task should not panic");
    }
}
