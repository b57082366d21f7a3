//! Rate limiting for link-relay.
//!
//! Inbound frames and published messages are limited per identity, with a
//! server-wide cap on top. Both use governor rate limiters; the keyed one is
//! backed by DashMap.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use link_types::Identity;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay.
#[derive(Clone)]
pub struct RateLimits {
    /// Limits messages per identity (`limits.messages_per_minute`).
    message_limiter: Arc<KeyedLimiter<Identity>>,

    /// Global limiter across all identities
    /// (`limits.global_messages_per_second`).
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("message_limiter", &"KeyedLimiter<Identity>")
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero values are rejected by [`crate::config::Config::validate`]; if one
    /// slips through it is treated as 1.
    pub fn new(config: &LimitsConfig) -> Self {
        let messages_per_minute =
            NonZeroU32::new(config.messages_per_minute).unwrap_or(NonZeroU32::MIN);
        let global_per_second =
            NonZeroU32::new(config.global_messages_per_second).unwrap_or(NonZeroU32::MIN);

        Self {
            message_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(messages_per_minute))),
            global_limiter: Arc::new(RateLimiter::direct(Quota::per_second(global_per_second))),
        }
    }

    /// Check if a message from `identity` is allowed.
    ///
    /// The per-identity limit is checked first so that one noisy identity
    /// does not drain the global budget.
    pub fn check_message(&self, identity: &Identity) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(identity)
            .map_err(|_| RateLimitError::MessageLimitExceeded)?;
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Get the number of tracked identities (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict idle identities from the keyed limiter.
    ///
    /// Call periodically from the cleanup task.
    pub fn shrink(&self) {
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many messages from this identity.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
    /// Global message rate exceeded across all identities.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(messages_per_minute: u32, global_messages_per_second: u32) -> LimitsConfig {
        LimitsConfig {
            messages_per_minute,
            max_connections_per_identity: 16,
            global_messages_per_second,
        }
    }

    fn identity(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    #[test]
    fn create_rate_limits() {
        let limits = RateLimits::new(&test_config(10, 1000));
        assert_eq!(limits.message_keys_count(), 0);
    }

    #[test]
    fn message_limit_allows_within_quota() {
        let limits = RateLimits::new(&test_config(5, 1000));
        let alice = identity("alice@example.com");

        // First 5 should succeed
        for _ in 0..5 {
            assert!(limits.check_message(&alice).is_ok());
        }

        // 6th should fail
        assert_eq!(
            limits.check_message(&alice),
            Err(RateLimitError::MessageLimitExceeded)
        );
    }

    #[test]
    fn identities_are_limited_independently() {
        let limits = RateLimits::new(&test_config(2, 1000));
        let alice = identity("alice@example.com");
        let bob = identity("bob@example.com");

        assert!(limits.check_message(&alice).is_ok());
        assert!(limits.check_message(&alice).is_ok());
        assert!(limits.check_message(&alice).is_err());

        assert!(limits.check_message(&bob).is_ok());
        assert_eq!(limits.message_keys_count(), 2);
    }

    #[test]
    fn global_limit_caps_all_identities() {
        let limits = RateLimits::new(&test_config(100, 3));

        for i in 0..3 {
            assert!(limits.check_message(&identity(&format!("u{}@example.com", i))).is_ok());
        }
        assert_eq!(
            limits.check_message(&identity("late@example.com")),
            Err(RateLimitError::GlobalLimitExceeded)
        );
    }

    #[test]
    fn shrink_does_not_panic() {
        let limits = RateLimits::new(&test_config(10, 1000));
        limits.check_message(&identity("alice@example.com")).unwrap();
        limits.shrink();
    }

    #[test]
    fn error_display() {
        assert_eq!(
            RateLimitError::MessageLimitExceeded.to_string(),
            "message rate limit exceeded"
        );
    }
}
