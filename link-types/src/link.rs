//! Relayed messages ("links").

use serde::{Deserialize, Serialize};

use crate::{Identity, LinkId, SessionTag};

/// A relayed message row.
///
/// The same shape is used for the encrypted row held by the store and for the
/// decrypted view returned to the owning identity; which one a value is
/// depends on where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Store-assigned id
    pub id: LinkId,
    /// Sender identity
    pub sender: String,
    /// Receiver identity
    pub receiver: String,
    /// Message payload
    pub message: String,
    /// Session the message originated from
    pub session_tag: String,
}

/// A message submitted for relaying, in plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLink {
    /// Who the message is from
    pub sender: Identity,
    /// Whose inbox the message lands in
    pub receiver: Identity,
    /// Message text (usually a URL or a short note)
    pub message: String,
    /// Originating session
    pub session_tag: SessionTag,
}

impl NewLink {
    /// A message a user sends to their own other devices.
    pub fn to_self(identity: Identity, message: impl Into<String>, session_tag: SessionTag) -> Self {
        Self {
            sender: identity.clone(),
            receiver: identity,
            message: message.into(),
            session_tag,
        }
    }
}
