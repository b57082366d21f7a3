//! Error types for Get-Link shared types.

use thiserror::Error;

/// Errors that can occur when building or decoding shared types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON serialization or deserialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Identity was empty after trimming
    #[error("identity must not be empty")]
    EmptyIdentity,

    /// Session tag was empty after trimming
    #[error("session tag must not be empty")]
    EmptySessionTag,

    /// Message was empty after trimming
    #[error("message must not be empty")]
    EmptyMessage,

    /// Message exceeds the configured maximum length
    #[error("message is {len} bytes, maximum is {max}")]
    MessageTooLong {
        /// Actual length in bytes
        len: usize,
        /// Maximum allowed length in bytes
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(
            TypesError::EmptyIdentity.to_string(),
            "identity must not be empty"
        );
    }

    #[test]
    fn too_long_display() {
        let err = TypesError::MessageTooLong { len: 10, max: 4 };
        assert_eq!(err.to_string(), "message is 10 bytes, maximum is 4");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
