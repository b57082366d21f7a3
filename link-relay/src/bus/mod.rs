//! Keyed publish/subscribe bus carrying encrypted envelopes.
//!
//! Delivery is claim-based. `recv` hands a subscription the oldest envelope no
//! one else holds; the consumer then does exactly one of:
//! - [`MessageBus::delete`] after a successful hand-off (consumption complete)
//! - [`BusSubscription::release`] after a failed hand-off (available again)
//! - [`BusSubscription::decline`] when the envelope is not for this
//!   subscriber (available to others, never offered here again)
//!
//! Dropping a subscription releases whatever it still holds. A crash between
//! a successful write and the delete leaves the envelope claimable again, so
//! delivery is at-most-once in the common case and may duplicate on failure.

mod memory;

pub use memory::{MemoryBus, MemorySubscription};

use crate::error::BusError;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Bus-assigned envelope id, unique per bus instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvelopeId(u64);

impl EnvelopeId {
    /// Create from a raw value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EnvelopeId({})", self.0)
    }
}

/// An envelope claimed by a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Envelope id, used to delete, release or decline it.
    pub id: EnvelopeId,
    /// Channel the envelope was published on.
    pub channel: String,
    /// Opaque (encrypted) payload.
    pub payload: String,
}

/// Pub/sub handle consumed by the relay.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish an envelope on a channel.
    async fn publish(&self, channel: &str, payload: String) -> Result<EnvelopeId, BusError>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn BusSubscription>, BusError>;

    /// Delete a consumed envelope.
    async fn delete(&self, channel: &str, id: EnvelopeId) -> Result<(), BusError>;

    /// Drop unclaimed envelopes older than `ttl` and forget idle channels.
    ///
    /// Returns the number of envelopes dropped.
    async fn purge_expired(&self, ttl: Duration) -> usize;

    /// Number of envelopes currently held, claimed or not.
    fn pending_envelopes(&self) -> usize;

    /// Stop the bus. Every pending and future `recv` fails with
    /// [`BusError::Closed`].
    fn shutdown(&self);
}

/// A live subscription to one channel.
#[async_trait]
pub trait BusSubscription: Send {
    /// Channel name.
    fn channel(&self) -> &str;

    /// Wait for and claim the next available envelope.
    async fn recv(&mut self) -> Result<BusMessage, BusError>;

    /// Give a claimed envelope back to the pool.
    async fn release(&mut self, id: EnvelopeId) -> Result<(), BusError>;

    /// Give a claimed envelope back and never receive it on this
    /// subscription again.
    async fn decline(&mut self, id: EnvelopeId) -> Result<(), BusError>;

    /// Close the subscription, releasing every claim it holds.
    async fn close(&mut self);
}
