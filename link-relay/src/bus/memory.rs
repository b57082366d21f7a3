//! In-process message bus.

use super::{BusMessage, BusSubscription, EnvelopeId, MessageBus};
use crate::error::BusError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// An envelope waiting on a channel.
#[derive(Debug)]
struct Pending {
    payload: String,
    published_at: Instant,
    /// Subscription currently holding the envelope.
    claimed_by: Option<u64>,
}

#[derive(Debug, Default)]
struct ChannelState {
    pending: BTreeMap<EnvelopeId, Pending>,
    subscribers: usize,
    /// Set once the channel has been removed from the map; publishers and
    /// subscribers that raced with the removal retry on a fresh channel.
    retired: bool,
}

#[derive(Debug, Default)]
struct Channel {
    state: Mutex<ChannelState>,
    notify: Notify,
}

impl Channel {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // No code path panics while holding this lock, but never propagate
        // poisoning into unrelated connections.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Default)]
struct Shared {
    channels: DashMap<String, Arc<Channel>>,
    next_envelope: AtomicU64,
    next_subscription: AtomicU64,
    closed: AtomicBool,
    shutdown: Notify,
}

impl Shared {
    fn channel(&self, name: &str) -> Arc<Channel> {
        self.channels
            .entry(name.to_string())
            .or_default()
            .clone()
    }
}

/// In-process [`MessageBus`] with per-channel FIFO ordering.
#[derive(Debug, Clone, Default)]
pub struct MemoryBus {
    shared: Arc<Shared>,
}

impl MemoryBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channels currently tracked.
    pub fn channel_count(&self) -> usize {
        self.shared.channels.len()
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<EnvelopeId, BusError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let id = EnvelopeId::new(self.shared.next_envelope.fetch_add(1, Ordering::Relaxed) + 1);
        let mut payload = Some(payload);

        loop {
            let chan = self.shared.channel(channel);
            {
                let mut state = chan.lock();
                if state.retired {
                    continue;
                }
                if let Some(payload) = payload.take() {
                    state.pending.insert(
                        id,
                        Pending {
                            payload,
                            published_at: Instant::now(),
                            claimed_by: None,
                        },
                    );
                }
            }
            chan.notify.notify_waiters();
            tracing::trace!("Published envelope {} on bus", id);
            return Ok(id);
        }
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscription>, BusError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        loop {
            let chan = self.shared.channel(channel);
            {
                let mut state = chan.lock();
                if state.retired {
                    continue;
                }
                state.subscribers += 1;
            }

            return Ok(Box::new(MemorySubscription {
                id: self.shared.next_subscription.fetch_add(1, Ordering::Relaxed) + 1,
                channel_name: channel.to_string(),
                channel: chan,
                shared: self.shared.clone(),
                claimed: HashSet::new(),
                declined: HashSet::new(),
                closed: false,
            }));
        }
    }

    async fn delete(&self, channel: &str, id: EnvelopeId) -> Result<(), BusError> {
        let chan = self
            .shared
            .channels
            .get(channel)
            .map(|c| c.value().clone())
            .ok_or(BusError::EnvelopeNotFound { id: id.value() })?;

        let mut state = chan.lock();
        state
            .pending
            .remove(&id)
            .map(|_| ())
            .ok_or(BusError::EnvelopeNotFound { id: id.value() })
    }

    async fn purge_expired(&self, ttl: Duration) -> usize {
        let channels: Vec<(String, Arc<Channel>)> = self
            .shared
            .channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut dropped = 0;
        for (name, chan) in channels {
            let mut state = chan.lock();
            let before = state.pending.len();
            state
                .pending
                .retain(|_, p| p.claimed_by.is_some() || p.published_at.elapsed() < ttl);
            dropped += before - state.pending.len();

            if state.pending.is_empty() && state.subscribers == 0 && !state.retired {
                state.retired = true;
                self.shared
                    .channels
                    .remove_if(&name, |_, current| Arc::ptr_eq(current, &chan));
            }
        }

        dropped
    }

    fn pending_envelopes(&self) -> usize {
        // Collect first: never lock a channel while holding a map shard.
        let channels: Vec<Arc<Channel>> = self
            .shared
            .channels
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        channels.iter().map(|chan| chan.lock().pending.len()).sum()
    }

    fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.shutdown.notify_waiters();
        tracing::info!("Message bus shut down");
    }
}

/// A subscription on a [`MemoryBus`] channel.
#[derive(Debug)]
pub struct MemorySubscription {
    id: u64,
    channel_name: String,
    channel: Arc<Channel>,
    shared: Arc<Shared>,
    /// Envelopes this subscription currently holds.
    claimed: HashSet<EnvelopeId>,
    /// Envelopes this subscription will not be offered again.
    declined: HashSet<EnvelopeId>,
    closed: bool,
}

impl MemorySubscription {
    fn give_back(&mut self, id: EnvelopeId) -> Result<(), BusError> {
        self.claimed.remove(&id);
        {
            let mut state = self.channel.lock();
            let pending = state
                .pending
                .get_mut(&id)
                .ok_or(BusError::EnvelopeNotFound { id: id.value() })?;
            if pending.claimed_by == Some(self.id) {
                pending.claimed_by = None;
            }
        }
        self.channel.notify.notify_waiters();
        Ok(())
    }

    fn release_all(&mut self) {
        if self.claimed.is_empty() {
            return;
        }
        {
            let mut state = self.channel.lock();
            for id in self.claimed.drain() {
                if let Some(pending) = state.pending.get_mut(&id) {
                    if pending.claimed_by == Some(self.id) {
                        pending.claimed_by = None;
                    }
                }
            }
        }
        self.channel.notify.notify_waiters();
    }

    fn detach(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.release_all();
        let mut state = self.channel.lock();
        state.subscribers = state.subscribers.saturating_sub(1);
    }
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    fn channel(&self) -> &str {
        &self.channel_name
    }

    async fn recv(&mut self) -> Result<BusMessage, BusError> {
        loop {
            if self.closed {
                return Err(BusError::Closed);
            }

            // Register for wake-ups before looking, so a publish between the
            // check and the wait is not missed.
            let notified = self.channel.notify.notified();
            let shutdown = self.shared.shutdown.notified();
            tokio::pin!(notified);
            tokio::pin!(shutdown);
            notified.as_mut().enable();
            shutdown.as_mut().enable();

            if self.shared.closed.load(Ordering::Acquire) {
                return Err(BusError::Closed);
            }

            {
                let mut state = self.channel.lock();
                self.declined.retain(|id| state.pending.contains_key(id));

                let declined = &self.declined;
                let next = state
                    .pending
                    .iter_mut()
                    .find(|(id, p)| p.claimed_by.is_none() && !declined.contains(*id));

                if let Some((id, pending)) = next {
                    pending.claimed_by = Some(self.id);
                    let id = *id;
                    let payload = pending.payload.clone();
                    drop(state);

                    self.claimed.insert(id);
                    return Ok(BusMessage {
                        id,
                        channel: self.channel_name.clone(),
                        payload,
                    });
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = &mut shutdown => {}
            }
        }
    }

    async fn release(&mut self, id: EnvelopeId) -> Result<(), BusError> {
        self.give_back(id)
    }

    async fn decline(&mut self, id: EnvelopeId) -> Result<(), BusError> {
        self.declined.insert(id);
        self.give_back(id)
    }

    async fn close(&mut self) {
        self.detach();
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const CHANNEL: &str = "tok-alice";

    async fn assert_blocks(sub: &mut Box<dyn BusSubscription>) {
        let result = timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(result.is_err(), "recv should block, got {:?}", result);
    }

    #[tokio::test]
    async fn publish_then_recv() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();

        let id = bus.publish(CHANNEL, "payload".into()).await.unwrap();
        let msg = sub.recv().await.unwrap();

        assert_eq!(msg.id, id);
        assert_eq!(msg.channel, CHANNEL);
        assert_eq!(msg.payload, "payload");
    }

    #[tokio::test]
    async fn envelopes_published_before_subscribe_are_delivered() {
        let bus = MemoryBus::new();
        bus.publish(CHANNEL, "early".into()).await.unwrap();

        let mut sub = bus.subscribe(CHANNEL).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, "early");
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();

        bus.publish("tok-bob", "not yours".into()).await.unwrap();
        assert_blocks(&mut sub).await;
    }

    #[tokio::test]
    async fn fifo_order_per_channel() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();

        for i in 0..3 {
            bus.publish(CHANNEL, format!("m{}", i)).await.unwrap();
        }
        for i in 0..3 {
            let msg = sub.recv().await.unwrap();
            assert_eq!(msg.payload, format!("m{}", i));
            bus.delete(CHANNEL, msg.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn claimed_envelope_is_not_offered_twice() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe(CHANNEL).await.unwrap();
        let mut b = bus.subscribe(CHANNEL).await.unwrap();

        bus.publish(CHANNEL, "once".into()).await.unwrap();

        let msg = a.recv().await.unwrap();
        assert_blocks(&mut b).await;

        bus.delete(CHANNEL, msg.id).await.unwrap();
        assert_blocks(&mut b).await;
        assert_eq!(bus.pending_envelopes(), 0);
    }

    #[tokio::test]
    async fn released_envelope_is_redelivered() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe(CHANNEL).await.unwrap();
        let mut b = bus.subscribe(CHANNEL).await.unwrap();

        bus.publish(CHANNEL, "retry me".into()).await.unwrap();
        let first = a.recv().await.unwrap();
        a.release(first.id).await.unwrap();

        let second = timeout(Duration::from_secs(1), b.recv()).await.unwrap().unwrap();
        assert_eq!(second.id, first.id);
    }

    #[tokio::test]
    async fn declined_envelope_goes_to_other_subscriber_only() {
        let bus = MemoryBus::new();
        let mut own = bus.subscribe(CHANNEL).await.unwrap();

        bus.publish(CHANNEL, "echo".into()).await.unwrap();
        let msg = own.recv().await.unwrap();
        own.decline(msg.id).await.unwrap();

        assert_blocks(&mut own).await;

        let mut other = bus.subscribe(CHANNEL).await.unwrap();
        let got = timeout(Duration::from_secs(1), other.recv()).await.unwrap().unwrap();
        assert_eq!(got.id, msg.id);
    }

    #[tokio::test]
    async fn dropping_subscription_releases_claims() {
        let bus = MemoryBus::new();
        let mut a = bus.subscribe(CHANNEL).await.unwrap();
        let mut b = bus.subscribe(CHANNEL).await.unwrap();

        bus.publish(CHANNEL, "held".into()).await.unwrap();
        let msg = a.recv().await.unwrap();
        drop(a);

        let got = timeout(Duration::from_secs(1), b.recv()).await.unwrap().unwrap();
        assert_eq!(got.id, msg.id);
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(CHANNEL, "late".into()).await.unwrap();
        });

        let msg = timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
        assert_eq!(msg.payload, "late");
    }

    #[tokio::test]
    async fn delete_unknown_envelope_fails() {
        let bus = MemoryBus::new();
        let err = bus.delete(CHANNEL, EnvelopeId::new(99)).await.unwrap_err();
        assert_eq!(err, BusError::EnvelopeNotFound { id: 99 });
    }

    #[tokio::test]
    async fn shutdown_fails_pending_recv() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.shutdown();

        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(result, Err(BusError::Closed));
        assert_eq!(bus.publish(CHANNEL, "x".into()).await, Err(BusError::Closed));
    }

    #[tokio::test]
    async fn closed_subscription_stops_receiving() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();
        sub.close().await;
        assert_eq!(sub.recv().await, Err(BusError::Closed));
    }

    #[tokio::test]
    async fn purge_drops_unclaimed_and_idle_channels() {
        let bus = MemoryBus::new();
        bus.publish(CHANNEL, "stale".into()).await.unwrap();
        assert_eq!(bus.channel_count(), 1);

        assert_eq!(bus.purge_expired(Duration::ZERO).await, 1);
        assert_eq!(bus.pending_envelopes(), 0);
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn purge_keeps_claimed_and_fresh_envelopes() {
        let bus = MemoryBus::new();
        let mut sub = bus.subscribe(CHANNEL).await.unwrap();

        bus.publish(CHANNEL, "claimed".into()).await.unwrap();
        let _msg = sub.recv().await.unwrap();
        bus.publish(CHANNEL, "fresh".into()).await.unwrap();

        assert_eq!(bus.purge_expired(Duration::from_secs(3600)).await, 0);
        assert_eq!(bus.purge_expired(Duration::ZERO).await, 1);
        assert_eq!(bus.pending_envelopes(), 1);
        assert_eq!(bus.channel_count(), 1);
    }

    #[tokio::test]
    async fn publish_after_purge_uses_fresh_channel() {
        let bus = MemoryBus::new();
        bus.purge_expired(Duration::ZERO).await;
        bus.publish(CHANNEL, "a".into()).await.unwrap();
        bus.purge_expired(Duration::ZERO).await;

        let mut sub = bus.subscribe(CHANNEL).await.unwrap();
        bus.publish(CHANNEL, "b".into()).await.unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, "b");
    }
}
