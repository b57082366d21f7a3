//! End-to-end relay scenarios over in-memory connections.

use link_relay::bus::{MemoryBus, MessageBus};
use link_relay::config::Config;
use link_relay::connection::{memory_pair, MemoryClient};
use link_relay::crypto;
use link_relay::error::RelayError;
use link_relay::registry::ConnectionRegistry;
use link_relay::relay::{ConnectedSession, LinkRelay};
use link_relay::store::SqliteLinkStore;
use link_types::{Identity, LinkFrame, SessionTag};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

struct Harness {
    relay: Arc<LinkRelay>,
    bus: MemoryBus,
}

impl Harness {
    async fn new() -> Self {
        Self::with_config(Config::default()).await
    }

    async fn with_config(config: Config) -> Self {
        let bus = MemoryBus::new();
        let relay = Arc::new(LinkRelay::new(
            config,
            Arc::new(SqliteLinkStore::in_memory().await.unwrap()),
            Arc::new(bus.clone()),
            Arc::new(ConnectionRegistry::new()),
        ));
        Self { relay, bus }
    }

    async fn connect(&self, identity: &Identity, tag: &str) -> (ConnectedSession, MemoryClient) {
        let (conn, client) = memory_pair();
        let session = self
            .relay
            .connect(identity.clone(), session(tag), conn)
            .await
            .unwrap();
        // Let the write loop subscribe before anything is published.
        tokio::time::sleep(Duration::from_millis(20)).await;
        (session, client)
    }
}

fn identity(email: &str) -> Identity {
    Identity::new(email).unwrap()
}

fn session(tag: &str) -> SessionTag {
    SessionTag::new(tag).unwrap()
}

async fn next_frame(client: &mut MemoryClient) -> LinkFrame {
    let text = client.recv_timeout(WAIT).await.expect("frame expected");
    LinkFrame::from_json(&text).unwrap()
}

#[tokio::test]
async fn web_to_mobile_round_trip() {
    let h = Harness::new().await;
    let alice = identity("alice@example.com");
    let (_web, mut web) = h.connect(&alice, "web").await;
    let (_mobile, mut mobile) = h.connect(&alice, "mobile").await;

    web.send("hello").await.unwrap();

    let frame = next_frame(&mut mobile).await;
    assert_eq!(frame.message, "hello");
    assert_eq!(frame.sender, "alice@example.com");
    assert_eq!(web.recv_timeout(QUIET).await, None);

    // The sending session does not see its own link when listing.
    assert!(h.relay.list_for(&alice, "web").await.unwrap().is_empty());
    let from_mobile = h.relay.list_for(&alice, "mobile").await.unwrap();
    assert_eq!(from_mobile.len(), 1);
    assert_eq!(from_mobile[0].id, frame.id);

    h.relay.delete_link(&alice, frame.id).await.unwrap();
    assert!(h.relay.store().get(frame.id).await.unwrap().is_none());
    assert!(matches!(
        h.relay.delete_link(&alice, frame.id).await,
        Err(RelayError::NotFound { .. })
    ));
}

#[tokio::test]
async fn webhook_publish_reaches_every_live_session_kind() {
    let h = Harness::new().await;
    let alice = identity("alice@example.com");
    let (_web, mut web) = h.connect(&alice, "web").await;

    let id = h
        .relay
        .publish(&alice, "https://example.com/article", &session("whatsapp"))
        .await
        .unwrap();

    let frame = next_frame(&mut web).await;
    assert_eq!(frame.id, id);
    assert_eq!(frame.message, "https://example.com/article");

    let listed = h.relay.list_for(&alice, "web").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_tag, "whatsapp");
}

#[tokio::test]
async fn links_stay_within_one_identity() {
    let h = Harness::new().await;
    let alice = identity("alice@example.com");
    let bob = identity("bob@example.com");
    let (_bob_web, mut bob_web) = h.connect(&bob, "web").await;

    let id = h
        .relay
        .publish(&alice, "private", &session("mobile"))
        .await
        .unwrap();

    assert_eq!(bob_web.recv_timeout(QUIET).await, None);
    assert!(h.relay.list_for(&bob, "web").await.unwrap().is_empty());
    assert!(matches!(
        h.relay.delete_link(&bob, id).await,
        Err(RelayError::NotFound { .. })
    ));
    assert_eq!(h.relay.list_for(&alice, "web").await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn envelope_is_delivered_to_one_session_only() {
    let h = Harness::new().await;
    let alice = identity("alice@example.com");
    let (_mobile, mut mobile) = h.connect(&alice, "mobile").await;
    let (_tablet, mut tablet) = h.connect(&alice, "tablet").await;

    h.relay
        .publish(&alice, "once", &session("whatsapp"))
        .await
        .unwrap();

    let (a, b) = tokio::join!(mobile.recv_timeout(QUIET), tablet.recv_timeout(QUIET));
    let delivered = [a, b].into_iter().flatten().count();
    assert_eq!(delivered, 1);
    assert_eq!(h.bus.pending_envelopes(), 0);
}

#[tokio::test]
async fn failed_write_leaves_envelope_for_next_session() {
    let h = Harness::new().await;
    let alice = identity("alice@example.com");
    let (broken_session, mut broken) = h.connect(&alice, "mobile").await;
    broken.stop_receiving();

    h.relay
        .publish(&alice, "retry me", &session("web"))
        .await
        .unwrap();
    tokio::time::timeout(WAIT, broken_session.write_task)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(h.bus.pending_envelopes(), 1);

    // A fresh session picks up the released envelope. Delivery after a
    // failed write is at least once, never lost.
    let (_retry, mut retry) = h.connect(&alice, "mobile").await;
    let frame = next_frame(&mut retry).await;
    assert_eq!(frame.message, "retry me");
}

#[tokio::test]
async fn connection_limit_is_enforced_per_identity() {
    let mut config = Config::default();
    config.limits.max_connections_per_identity = 1;
    let h = Harness::with_config(config).await;
    let alice = identity("alice@example.com");
    let bob = identity("bob@example.com");

    let (first, mut first_client) = h.connect(&alice, "web").await;

    let (conn, _client) = memory_pair();
    let refused = h.relay.connect(alice.clone(), session("mobile"), conn).await;
    assert!(matches!(refused, Err(RelayError::RateLimited { .. })));

    // Other identities are unaffected.
    let (_bob, _bob_client) = h.connect(&bob, "web").await;
    assert_eq!(h.relay.total_identities(), 2);

    first_client.close();
    tokio::time::timeout(WAIT, first.read_task).await.unwrap().unwrap();
    assert!(!h.relay.registry().contains_identity(&alice));

    let (_again, _again_client) = h.connect(&alice, "mobile").await;
    assert_eq!(h.relay.registry().connection_count(&alice).await, 1);
}

#[tokio::test]
async fn bus_shutdown_disconnects_sessions() {
    let h = Harness::new().await;
    let alice = identity("alice@example.com");
    let (web_session, mut web) = h.connect(&alice, "web").await;

    h.bus.shutdown();

    assert_eq!(
        web.recv_timeout(WAIT).await.as_deref(),
        Some(link_relay::bridge::RECEIVE_ERROR_NOTICE)
    );
    tokio::time::timeout(WAIT, web_session.write_task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn offline_messages_are_listed_later() {
    let h = Harness::new().await;
    let alice = identity("alice@example.com");

    for msg in ["one", "two", "three"] {
        h.relay.publish(&alice, msg, &session("slack")).await.unwrap();
    }

    let links = h.relay.list_for(&alice, "web").await.unwrap();
    let messages: Vec<_> = links.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, ["one", "two", "three"]);

    let token = crypto::self_token(alice.as_str()).unwrap();
    let row = h.relay.store().get(links[0].id).await.unwrap().unwrap();
    assert_eq!(row.receiver, token);
    assert_ne!(row.message, "one");

    assert_eq!(h.relay.delete_all_for(&alice).await.unwrap(), 3);
    assert!(h.relay.list_for(&alice, "web").await.unwrap().is_empty());
}
