//! Payloads carried on the message bus and written to live connections.

use serde::{Deserialize, Serialize};

use crate::{LinkId, TypesError};

/// Plaintext content of a bus envelope.
///
/// The relay encrypts the JSON form of this struct before publishing it, so the
/// bus itself only ever sees an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Id of the persisted link this envelope announces
    pub id: LinkId,
    /// Sender identity
    pub sender: String,
    /// Message text
    pub message: String,
    /// Session the message originated from (for self-echo suppression)
    pub session_tag: String,
}

impl RelayEnvelope {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, TypesError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, TypesError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A text frame delivered to a live connection.
///
/// Same shape as an inbox listing entry, so a device can delete what it was
/// pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFrame {
    /// Id of the persisted link
    pub id: LinkId,
    /// Sender identity
    pub sender: String,
    /// Message text
    pub message: String,
}

impl LinkFrame {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, TypesError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self, TypesError> {
        Ok(serde_json::from_str(json)?)
    }
}
