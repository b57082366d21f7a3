//! Link persistence.
//!
//! Rows are stored exactly as the relay hands them over: `sender`, `receiver`
//! and `message` are already ciphertext, so the store never sees plaintext.

mod sqlite;

pub use sqlite::SqliteLinkStore;

use crate::error::StorageError;
use async_trait::async_trait;
use link_types::{Link, LinkId};

/// Request to store a new link. All text fields except `session_tag` are
/// ciphertext.
#[derive(Debug, Clone)]
pub struct StoreLinkRequest {
    /// Encrypted sender identity.
    pub sender: String,
    /// Encrypted receiver identity (the receiver's self token).
    pub receiver: String,
    /// Encrypted message.
    pub message: String,
    /// Originating session.
    pub session_tag: String,
}

/// Result of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertedLink {
    /// Store-assigned id.
    pub id: LinkId,
    /// Number of rows written.
    pub rows_affected: u64,
}

/// Trait for link storage backends.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Append a link row.
    async fn insert(&self, req: StoreLinkRequest) -> Result<InsertedLink, StorageError>;

    /// Remove a row by id. Returns the number of rows deleted.
    async fn delete(&self, id: LinkId) -> Result<u64, StorageError>;

    /// Remove a row by id only if it belongs to `receiver`.
    ///
    /// Returns the number of rows deleted (0 for unknown or foreign ids).
    async fn delete_for_receiver(&self, id: LinkId, receiver: &str) -> Result<u64, StorageError>;

    /// Remove every row addressed to `receiver`.
    async fn delete_all_for_receiver(&self, receiver: &str) -> Result<u64, StorageError>;

    /// All rows addressed to `receiver` whose session tag differs from
    /// `exclude_session_tag`, oldest first.
    async fn query(
        &self,
        receiver: &str,
        exclude_session_tag: &str,
    ) -> Result<Vec<Link>, StorageError>;

    /// Get a specific row by id.
    async fn get(&self, id: LinkId) -> Result<Option<Link>, StorageError>;

    /// Total number of stored rows.
    async fn count(&self) -> Result<u64, StorageError>;
}
