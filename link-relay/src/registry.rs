//! Live connection tracking per identity.
//!
//! Two-level locking: the DashMap shard lock is only held to find or create
//! an identity's entry, and each entry has its own async mutex guarding the
//! connection list. An identity is present in the map if and only if it has
//! at least one live connection.

use dashmap::DashMap;
use link_types::{ConnectionId, Identity, SessionTag};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A handle identifying one live connection of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    /// Unique connection id.
    pub id: ConnectionId,
    /// Session the connection belongs to.
    pub session_tag: SessionTag,
}

impl ConnectionHandle {
    /// Create a handle with a fresh connection id.
    pub fn new(session_tag: SessionTag) -> Self {
        Self {
            id: ConnectionId::new(),
            session_tag,
        }
    }
}

/// Outcome of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The handle was added.
    Added,
    /// The handle was already registered; nothing changed.
    AlreadyPresent,
    /// The identity already holds the maximum number of connections.
    LimitReached,
}

/// Connection list for one identity.
#[derive(Debug, Default)]
struct IdentityConnections {
    handles: Vec<ConnectionHandle>,
    /// Set once the entry has been removed from the map. A registration that
    /// raced with the removal must retry with a fresh entry.
    retired: bool,
}

/// Registry of live connections keyed by plaintext identity.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: DashMap<Identity, Arc<Mutex<IdentityConnections>>>,
    /// Live connections across all identities, updated under the entry lock.
    connections: AtomicUsize,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Registering the same handle twice is a no-op.
    pub async fn register(&self, identity: &Identity, handle: ConnectionHandle) -> Registration {
        self.register_within(identity, handle, usize::MAX).await
    }

    /// Register a connection unless the identity already has `limit` of them.
    pub async fn register_within(
        &self,
        identity: &Identity,
        handle: ConnectionHandle,
        limit: usize,
    ) -> Registration {
        loop {
            let entry = self
                .entries
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(IdentityConnections::default())))
                .clone();

            let mut guard = entry.lock().await;
            if guard.retired {
                continue;
            }

            if guard.handles.contains(&handle) {
                return Registration::AlreadyPresent;
            }
            if guard.handles.len() >= limit {
                return Registration::LimitReached;
            }

            guard.handles.push(handle);
            self.connections.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "Registered connection for {} (total: {})",
                identity,
                guard.handles.len()
            );
            return Registration::Added;
        }
    }

    /// Unregister a connection.
    ///
    /// Returns `true` if the handle was present. Unknown identities and
    /// handles are expected during disconnect races and only logged.
    pub async fn unregister(&self, identity: &Identity, handle: &ConnectionHandle) -> bool {
        let Some(entry) = self.entries.get(identity).map(|e| e.value().clone()) else {
            tracing::warn!("Unregister for unknown identity {}", identity);
            return false;
        };

        let mut guard = entry.lock().await;
        let before = guard.handles.len();
        guard.handles.retain(|h| h != handle);
        let removed = guard.handles.len() != before;

        if removed {
            self.connections.fetch_sub(1, Ordering::Relaxed);
        } else {
            tracing::debug!("Connection {:?} already unregistered for {}", handle.id, identity);
        }

        if guard.handles.is_empty() && !guard.retired {
            guard.retired = true;
            self.entries
                .remove_if(identity, |_, current| Arc::ptr_eq(current, &entry));
            tracing::debug!("Removed last connection for {}", identity);
        }

        removed
    }

    /// Live connections of an identity.
    pub async fn handles(&self, identity: &Identity) -> Vec<ConnectionHandle> {
        let Some(entry) = self.entries.get(identity).map(|e| e.value().clone()) else {
            return Vec::new();
        };
        let guard = entry.lock().await;
        guard.handles.clone()
    }

    /// Number of live connections of an identity.
    pub async fn connection_count(&self, identity: &Identity) -> usize {
        self.handles(identity).await.len()
    }

    /// Whether the identity currently has an entry.
    pub fn contains_identity(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    /// Total live connections across all identities.
    pub fn total_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    /// Number of identities with at least one live connection.
    pub fn total_identities(&self) -> usize {
        self.entries.len()
    }
}
