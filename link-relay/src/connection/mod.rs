//! Duplex text connections.
//!
//! A connection is split into independently owned halves so the read loop and
//! the write loop never block each other.

mod memory;
mod ws;

pub use memory::{memory_pair, MemoryClient};
pub use ws::from_websocket;

use crate::error::TransportError;
use async_trait::async_trait;

/// Inbound half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Read the next text frame.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly.
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Write one text frame.
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the outbound half. Closing twice is a no-op.
    async fn close(&mut self);
}

/// A live duplex connection handed to the relay after upgrade and
/// authentication.
pub struct DuplexConnection {
    /// Inbound half.
    pub reader: Box<dyn FrameReader>,
    /// Outbound half.
    pub writer: Box<dyn FrameWriter>,
}

impl DuplexConnection {
    /// Assemble a connection from its halves.
    pub fn new(reader: Box<dyn FrameReader>, writer: Box<dyn FrameWriter>) -> Self {
        Self { reader, writer }
    }
}

impl std::fmt::Debug for DuplexConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplexConnection").finish_non_exhaustive()
    }
}
