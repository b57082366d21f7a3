//! Error types for link-relay.

use link_types::{LinkId, TypesError};
use std::path::PathBuf;

/// Main error type returned by the relay operations.
///
/// Only `publish`, `list_for` and `delete_link` surface these to callers; the
/// background loops log and carry on or stop.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid caller input (empty identity, empty message, ...).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] TypesError),

    /// Link does not exist or belongs to another identity.
    #[error("link not found: {id}")]
    NotFound {
        /// The requested link id.
        id: LinkId,
    },

    /// Rate limit exceeded.
    #[error("rate limit exceeded: {reason}")]
    RateLimited {
        /// Reason for rate limiting.
        reason: String,
    },
}

/// Storage layer errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

/// Crypto engine errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The key seed was empty, so no key can be derived.
    #[error("key seed must not be empty")]
    EmptySeed,

    /// Input is not valid base64, is empty, or is not a whole number of blocks.
    #[error("malformed ciphertext: {reason}")]
    MalformedCiphertext {
        /// What was wrong with the input.
        reason: String,
    },

    /// Decrypted data did not end in valid PKCS#7 padding.
    #[error("invalid padding")]
    PaddingError,

    /// Decrypted bytes are not UTF-8.
    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,
}

/// Message bus errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BusError {
    /// The bus (or this subscription) has been shut down.
    #[error("bus closed")]
    Closed,

    /// The envelope was already deleted or never existed.
    #[error("envelope {id} not found on channel")]
    EnvelopeNotFound {
        /// Envelope id.
        id: u64,
    },
}

/// Duplex connection errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is gone.
    #[error("connection closed")]
    Closed,

    /// Reading a frame failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Writing a frame failed.
    #[error("write failed: {0}")]
    Write(String),
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = RelayError::NotFound { id: LinkId::new(5) };
        assert_eq!(err.to_string(), "link not found: 5");
    }

    #[test]
    fn crypto_error_converts() {
        let err: RelayError = CryptoError::PaddingError.into();
        assert!(matches!(err, RelayError::Crypto(CryptoError::PaddingError)));
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RelayError>();
        assert_send_sync::<StorageError>();
        assert_send_sync::<BusError>();
    }
}
