//! Identity and addressing types for Get-Link.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// A verified user identity (email-equivalent).
///
/// Used as the registry key, the channel key and the encryption key seed, so it
/// is always stored trimmed and is never empty.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    /// Create an identity from a verified string.
    ///
    /// Surrounding whitespace is removed. Returns an error if nothing is left.
    pub fn new(value: impl AsRef<str>) -> Result<Self, TypesError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TypesError::EmptyIdentity);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identity {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.0)
    }
}

/// An opaque discriminator for the device or session a message came from.
///
/// Examples: `"web"`, `"mobile"`, `"whatsapp"`. Only used for self-echo
/// suppression.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionTag(String);

impl SessionTag {
    /// Create a session tag. Returns an error if the trimmed value is empty.
    pub fn new(value: impl AsRef<str>) -> Result<Self, TypesError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TypesError::EmptySessionTag);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Get the tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionTag {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionTag> for String {
    fn from(tag: SessionTag) -> Self {
        tag.0
    }
}

impl fmt::Display for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionTag({})", self.0)
    }
}

/// Store-assigned identifier of a persisted link.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(i64);

impl LinkId {
    /// Wrap a raw store id.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw store id.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkId({})", self.0)
    }
}

/// A unique identifier for one live duplex connection.
///
/// UUID v4 format. Two connections of the same identity and session tag
/// still get distinct ids.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    /// Create a new random ConnectionId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", &self.0.to_string()[..8])
    }
}
