//! # link-relay
//!
//! Real-time encrypted relay for Get-Link.
//!
//! This crate implements the relay core that:
//! - Tracks live duplex connections per user identity
//! - Persists every relayed message encrypted under a key derived from the
//!   recipient identity
//! - Pushes new messages over a claim-based message bus to the *other* live
//!   sessions of the same user (self-echo suppressed by session tag)
//! - Exposes add/list/delete operations for the HTTP and webhook layers
//!
//! ## Architecture
//!
//! ```text
//!  web session ──┐                              ┌── mobile session
//!   (read loop)  │                              │  (write loop)
//!                ▼                              │
//!        ┌───────────────────────────────────────────┐
//!        │                 LinkRelay                 │
//!        │  ┌──────────┐  ┌──────────┐  ┌─────────┐  │
//!        │  │ registry │  │  SQLite  │  │   bus   │──┼──► claim, write, delete
//!        │  └──────────┘  └──────────┘  └─────────┘  │
//!        └───────────────────────────────────────────┘
//!                ▲
//!   webhook adapters (publish)
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod bus;
pub mod cleanup;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod http;
pub mod limits;
pub mod registry;
pub mod relay;
pub mod store;
