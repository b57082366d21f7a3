//! Per-connection loops between a duplex connection and the bus.
//!
//! Every connection runs two independent tasks:
//! - the read loop persists and announces each inbound frame
//! - the write loop delivers envelopes from the identity's channel
//!
//! They share nothing but the registry entry and a pair of hang-up handles:
//! whichever loop stops first drops its handle and the other one follows.
//! Only the read loop unregisters, once both directions are done.

use crate::connection::{FrameReader, FrameWriter};
use crate::crypto;
use crate::error::{RelayError, Result};
use crate::registry::ConnectionHandle;
use crate::relay::{LinkRelay, RelayMetrics};
use link_types::{Identity, LinkFrame, RelayEnvelope};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Frame written to a connection when its bus subscription fails.
pub const RECEIVE_ERROR_NOTICE: &str = "Error in receiving message. Try again.";

/// Drain a connection into the store and bus until it closes or the write
/// loop gives up.
pub(crate) async fn read_loop(
    relay: Arc<LinkRelay>,
    identity: Identity,
    handle: ConnectionHandle,
    mut reader: Box<dyn FrameReader>,
    hangup: oneshot::Sender<()>,
    mut writer_gone: oneshot::Receiver<()>,
) {
    loop {
        let read = tokio::select! {
            biased;
            _ = &mut writer_gone => {
                tracing::debug!(
                    "Read loop for {} session of {} stopping",
                    handle.session_tag,
                    identity
                );
                break;
            }
            read = reader.read_frame() => read,
        };

        let frame = match read {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::debug!("{} session of {} closed", handle.session_tag, identity);
                break;
            }
            Err(e) => {
                tracing::debug!(
                    "Read failed for {} session of {}: {}",
                    handle.session_tag,
                    identity,
                    e
                );
                break;
            }
        };

        RelayMetrics::incr(&relay.metrics().frames_received);

        match relay.publish(&identity, &frame, &handle.session_tag).await {
            Ok(id) => tracing::debug!("Relayed frame from {} as link {}", handle.session_tag, id),
            Err(RelayError::RateLimited { reason }) => {
                tracing::warn!("Dropping frame from {}: {}", identity, reason);
            }
            Err(RelayError::InvalidInput(e)) => {
                tracing::warn!("Dropping frame from {}: {}", identity, e);
            }
            Err(e) => {
                RelayMetrics::incr(&relay.metrics().errors_total);
                tracing::error!("Failed to relay frame from {}: {}", identity, e);
            }
        }
    }

    drop(hangup);
    relay.registry().unregister(&identity, &handle).await;
}

/// Deliver envelopes from the identity's channel until the connection or the
/// bus goes away. Dropping `done` on return stops the read loop.
pub(crate) async fn write_loop(
    relay: Arc<LinkRelay>,
    identity: Identity,
    handle: ConnectionHandle,
    mut writer: Box<dyn FrameWriter>,
    mut hangup: oneshot::Receiver<()>,
    done: oneshot::Sender<()>,
) {
    let channel = match crypto::self_token(identity.as_str()) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("Cannot derive channel for {}: {}", identity, e);
            writer.close().await;
            return;
        }
    };

    let mut subscription = match relay.bus().subscribe(&channel).await {
        Ok(sub) => sub,
        Err(e) => {
            tracing::error!("Subscribe failed for {}: {}", identity, e);
            writer.close().await;
            return;
        }
    };

    loop {
        let received = tokio::select! {
            biased;
            _ = &mut hangup => {
                tracing::debug!(
                    "Write loop for {} session of {} stopping",
                    handle.session_tag,
                    identity
                );
                break;
            }
            received = subscription.recv() => received,
        };

        let message = match received {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Bus receive failed for {}: {}", identity, e);
                if let Err(e) = writer.write_frame(RECEIVE_ERROR_NOTICE.to_string()).await {
                    tracing::debug!("Error notice not delivered: {}", e);
                }
                break;
            }
        };

        let envelope = match open_envelope(&identity, &message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                // Nobody else can decrypt it either.
                RelayMetrics::incr(&relay.metrics().errors_total);
                tracing::warn!("Dropping unreadable envelope {}: {}", message.id, e);
                if let Err(e) = relay.bus().delete(&message.channel, message.id).await {
                    tracing::debug!("Envelope {} already gone: {}", message.id, e);
                }
                continue;
            }
        };

        if envelope.session_tag == handle.session_tag.as_str() {
            RelayMetrics::incr(&relay.metrics().self_echo_skipped);
            if let Err(e) = subscription.decline(message.id).await {
                tracing::debug!("Decline of envelope {} failed: {}", message.id, e);
            }
            continue;
        }

        let frame = LinkFrame {
            id: envelope.id,
            sender: envelope.sender,
            message: envelope.message,
        };
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                RelayMetrics::incr(&relay.metrics().errors_total);
                tracing::error!("Failed to encode frame for link {}: {}", frame.id, e);
                if let Err(e) = subscription.release(message.id).await {
                    tracing::debug!("Release of envelope {} failed: {}", message.id, e);
                }
                continue;
            }
        };

        if let Err(e) = writer.write_frame(text).await {
            tracing::debug!(
                "Write failed for {} session of {}: {}",
                handle.session_tag,
                identity,
                e
            );
            // Leave the envelope for another session or a reconnect.
            if let Err(e) = subscription.release(message.id).await {
                tracing::debug!("Release of envelope {} failed: {}", message.id, e);
            }
            break;
        }

        RelayMetrics::incr(&relay.metrics().frames_delivered);
        if let Err(e) = relay.bus().delete(&message.channel, message.id).await {
            tracing::warn!(
                "Delivered envelope {} not deleted, it may be delivered again: {}",
                message.id,
                e
            );
        }
    }

    subscription.close().await;
    writer.close().await;
    drop(done);
}

/// Decrypt and parse an envelope published for `identity`.
fn open_envelope(identity: &Identity, payload: &str) -> Result<RelayEnvelope> {
    let json = crypto::decrypt(identity.as_str(), payload)?;
    Ok(RelayEnvelope::from_json(&json)?)
}
