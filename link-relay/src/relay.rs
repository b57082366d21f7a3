//! LinkRelay coordination.
//!
//! LinkRelay owns the store, bus and registry handles and exposes the
//! operations used by the HTTP boundary and webhook adapters.

use crate::bridge;
use crate::bus::MessageBus;
use crate::config::Config;
use crate::connection::DuplexConnection;
use crate::crypto;
use crate::error::{RelayError, Result};
use crate::limits::RateLimits;
use crate::registry::{ConnectionHandle, ConnectionRegistry, Registration};
use crate::store::{LinkStore, StoreLinkRequest};
use link_types::{Identity, Link, LinkId, NewLink, RelayEnvelope, SessionTag, TypesError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Total connections accepted.
    pub connections_total: AtomicU64,
    /// Total frames read from live connections.
    pub frames_received: AtomicU64,
    /// Total links written to the store.
    pub links_stored: AtomicU64,
    /// Total envelopes published on the bus.
    pub envelopes_published: AtomicU64,
    /// Total frames delivered to live connections.
    pub frames_delivered: AtomicU64,
    /// Envelopes a write loop passed over because its own session sent them.
    pub self_echo_skipped: AtomicU64,
    /// Total rate limit rejections (per identity + global + connection cap).
    pub rate_limit_hits: AtomicU64,
    /// Total errors (store, crypto, bus) swallowed by background loops.
    pub errors_total: AtomicU64,
}

impl RelayMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A connection wired to its read and write loops.
#[derive(Debug)]
pub struct ConnectedSession {
    /// Registry handle of the connection.
    pub handle: ConnectionHandle,
    /// Task draining the connection into the store and bus.
    pub read_task: JoinHandle<()>,
    /// Task delivering bus envelopes to the connection.
    pub write_task: JoinHandle<()>,
}

/// Main relay.
pub struct LinkRelay {
    config: Config,
    store: Arc<dyn LinkStore>,
    bus: Arc<dyn MessageBus>,
    registry: Arc<ConnectionRegistry>,
    /// Rate limiters for inbound messages.
    rate_limits: RateLimits,
    /// Operational metrics (counters).
    metrics: RelayMetrics,
}

impl std::fmt::Debug for LinkRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("identities", &self.registry.total_identities())
            .finish_non_exhaustive()
    }
}

impl LinkRelay {
    /// Create a relay over the given collaborators.
    pub fn new(
        config: Config,
        store: Arc<dyn LinkStore>,
        bus: Arc<dyn MessageBus>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            store,
            bus,
            registry,
            rate_limits,
            metrics: RelayMetrics::default(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the link store.
    pub fn store(&self) -> &Arc<dyn LinkStore> {
        &self.store
    }

    /// Get access to the message bus.
    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Get access to the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Register a live connection and start its read and write loops.
    ///
    /// A connection beyond `limits.max_connections_per_identity` is closed
    /// without being registered.
    pub async fn connect(
        self: &Arc<Self>,
        identity: Identity,
        session_tag: SessionTag,
        mut conn: DuplexConnection,
    ) -> Result<ConnectedSession> {
        let handle = ConnectionHandle::new(session_tag);
        let limit = self.config.limits.max_connections_per_identity;

        match self
            .registry
            .register_within(&identity, handle.clone(), limit)
            .await
        {
            Registration::Added | Registration::AlreadyPresent => {}
            Registration::LimitReached => {
                RelayMetrics::incr(&self.metrics.rate_limit_hits);
                tracing::warn!(
                    "Refusing {} connection for {}: {} connections already live",
                    handle.session_tag,
                    identity,
                    limit
                );
                conn.writer.close().await;
                return Err(RelayError::RateLimited {
                    reason: format!("at most {} live connections per identity", limit),
                });
            }
        }

        RelayMetrics::incr(&self.metrics.connections_total);
        tracing::info!(
            "Connected {} session {:?} for {}",
            handle.session_tag,
            handle.id,
            identity
        );

        let DuplexConnection { reader, writer } = conn;
        let (hangup_tx, hangup_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();

        let read_task = tokio::spawn(bridge::read_loop(
            self.clone(),
            identity.clone(),
            handle.clone(),
            reader,
            hangup_tx,
            done_rx,
        ));
        let write_task = tokio::spawn(bridge::write_loop(
            self.clone(),
            identity,
            handle.clone(),
            writer,
            hangup_rx,
            done_tx,
        ));

        Ok(ConnectedSession {
            handle,
            read_task,
            write_task,
        })
    }

    /// Relay a message from `identity` to its own other sessions.
    ///
    /// Used by webhook adapters; behaves as if `session_tag` had sent the
    /// message over a live connection.
    pub async fn publish(
        &self,
        identity: &Identity,
        message: &str,
        session_tag: &SessionTag,
    ) -> Result<LinkId> {
        let link = NewLink::to_self(identity.clone(), message, session_tag.clone());
        self.add_link(identity, link).await
    }

    /// Persist a link and announce it on the receiver's channel.
    ///
    /// `sender` and `receiver` are stored encrypted under the receiver, the
    /// message under `acting`. The row is durable once this returns `Ok`;
    /// a failed announcement is only logged, the receiver still finds the
    /// link on its next listing.
    pub async fn add_link(&self, acting: &Identity, link: NewLink) -> Result<LinkId> {
        self.validate_message(&link.message)?;

        if let Err(e) = self.rate_limits.check_message(acting) {
            RelayMetrics::incr(&self.metrics.rate_limit_hits);
            return Err(RelayError::RateLimited {
                reason: e.to_string(),
            });
        }

        let receiver = link.receiver.as_str();
        let receiver_token = crypto::self_token(receiver)?;
        let request = StoreLinkRequest {
            sender: crypto::encrypt(receiver, link.sender.as_str())?,
            receiver: receiver_token.clone(),
            message: crypto::encrypt(acting.as_str(), &link.message)?,
            session_tag: link.session_tag.as_str().to_string(),
        };

        let inserted = self.store.insert(request).await?;
        RelayMetrics::incr(&self.metrics.links_stored);

        if inserted.rows_affected > 0 {
            let envelope = RelayEnvelope {
                id: inserted.id,
                sender: link.sender.as_str().to_string(),
                message: link.message,
                session_tag: link.session_tag.as_str().to_string(),
            };
            self.announce(receiver, &receiver_token, &envelope).await;
        }

        tracing::debug!(
            "Stored link {} from {} session for {}",
            inserted.id,
            link.session_tag,
            link.receiver
        );
        Ok(inserted.id)
    }

    /// Encrypt and publish an envelope. Failures are logged, never returned.
    async fn announce(&self, receiver: &str, channel: &str, envelope: &RelayEnvelope) {
        let sealed = match envelope
            .to_json()
            .map_err(RelayError::from)
            .and_then(|json| crypto::encrypt(receiver, &json).map_err(RelayError::from))
        {
            Ok(sealed) => sealed,
            Err(e) => {
                RelayMetrics::incr(&self.metrics.errors_total);
                tracing::error!("Failed to seal envelope for link {}: {}", envelope.id, e);
                return;
            }
        };

        match self.bus.publish(channel, sealed).await {
            Ok(envelope_id) => {
                RelayMetrics::incr(&self.metrics.envelopes_published);
                tracing::debug!("Announced link {} as envelope {}", envelope.id, envelope_id);
            }
            Err(e) => {
                RelayMetrics::incr(&self.metrics.errors_total);
                tracing::error!("Link {} stored but not announced: {}", envelope.id, e);
            }
        }
    }

    /// The identity's inbox, decrypted, excluding links sent by
    /// `exclude_session_tag`.
    ///
    /// Rows that do not decrypt under the identity are skipped.
    pub async fn list_for(
        &self,
        identity: &Identity,
        exclude_session_tag: &str,
    ) -> Result<Vec<Link>> {
        let token = crypto::self_token(identity.as_str())?;
        let rows = self.store.query(&token, exclude_session_tag).await?;

        let mut links = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match open_link(identity, row) {
                Ok(link) => links.push(link),
                Err(e) => tracing::warn!(
                    "Skipping link {} that does not decrypt for its receiver: {}",
                    id,
                    e
                ),
            }
        }
        Ok(links)
    }

    /// Delete one of the identity's links.
    ///
    /// Ids that do not exist or belong to another identity are `NotFound`.
    pub async fn delete_link(&self, identity: &Identity, id: LinkId) -> Result<()> {
        let token = crypto::self_token(identity.as_str())?;
        let deleted = self.store.delete_for_receiver(id, &token).await?;
        if deleted == 0 {
            return Err(RelayError::NotFound { id });
        }
        tracing::debug!("Deleted link {} for {}", id, identity);
        Ok(())
    }

    /// Delete the identity's whole inbox. Returns the number of links removed.
    pub async fn delete_all_for(&self, identity: &Identity) -> Result<u64> {
        let token = crypto::self_token(identity.as_str())?;
        let deleted = self.store.delete_all_for_receiver(&token).await?;
        tracing::info!("Deleted {} links for {}", deleted, identity);
        Ok(deleted)
    }

    /// Get total live connections across all identities.
    pub fn total_connections(&self) -> usize {
        self.registry.total_connections()
    }

    /// Get total identities with a live connection.
    pub fn total_identities(&self) -> usize {
        self.registry.total_identities()
    }

    fn validate_message(&self, message: &str) -> std::result::Result<(), TypesError> {
        if message.trim().is_empty() {
            return Err(TypesError::EmptyMessage);
        }
        let max = self.config.storage.max_message_len;
        if message.len() > max {
            return Err(TypesError::MessageTooLong {
                len: message.len(),
                max,
            });
        }
        Ok(())
    }
}

/// Decrypt a stored row for its receiver.
fn open_link(identity: &Identity, row: Link) -> Result<Link> {
    let seed = identity.as_str();
    Ok(Link {
        id: row.id,
        sender: crypto::decrypt(seed, &row.sender)?,
        receiver: crypto::decrypt(seed, &row.receiver)?,
        message: crypto::decrypt(seed, &row.message)?,
        session_tag: row.session_tag,
    })
}
