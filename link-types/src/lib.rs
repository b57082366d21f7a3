//! # link-types
//!
//! Shared types for the Get-Link relay.
//!
//! This crate provides the foundational types used by the relay and its clients:
//! - [`Identity`], [`SessionTag`], [`LinkId`], [`ConnectionId`] - Identity and addressing types
//! - [`Link`], [`NewLink`] - Relayed messages as stored and as submitted
//! - [`RelayEnvelope`], [`LinkFrame`] - Bus envelope and connection frame payloads
//! - [`TypesError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod link;

pub use envelope::{LinkFrame, RelayEnvelope};
pub use error::TypesError;
pub use ids::{ConnectionId, Identity, LinkId, SessionTag};
pub use link::{Link, NewLink};
