//! Channel-backed connection pair for in-process use and tests.

use super::{DuplexConnection, FrameReader, FrameWriter};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

const FRAME_BUFFER: usize = 64;

/// Create a connected pair: the relay side and the client side.
pub fn memory_pair() -> (DuplexConnection, MemoryClient) {
    let (inbound_tx, inbound_rx) = mpsc::channel(FRAME_BUFFER);
    let (outbound_tx, outbound_rx) = mpsc::channel(FRAME_BUFFER);

    let conn = DuplexConnection::new(
        Box::new(MemoryReader { rx: inbound_rx }),
        Box::new(MemoryWriter {
            tx: Some(outbound_tx),
        }),
    );
    let client = MemoryClient {
        tx: Some(inbound_tx),
        rx: outbound_rx,
    };
    (conn, client)
}

struct MemoryReader {
    rx: mpsc::Receiver<String>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

struct MemoryWriter {
    tx: Option<mpsc::Sender<String>>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame)
            .await
            .map_err(|_| TransportError::Write("client stopped receiving".to_string()))
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

/// The client end of a [`memory_pair`].
#[derive(Debug)]
pub struct MemoryClient {
    tx: Option<mpsc::Sender<String>>,
    rx: mpsc::Receiver<String>,
}

impl MemoryClient {
    /// Send a frame to the relay.
    pub async fn send(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame.into()).await.map_err(|_| TransportError::Closed)
    }

    /// Wait for the next frame from the relay. `None` once the relay closed
    /// its side.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Wait up to `timeout` for the next frame.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }

    /// Stop accepting frames; later relay writes fail.
    pub fn stop_receiving(&mut self) {
        self.rx.close();
    }

    /// Hang up: the relay's next read sees a clean close.
    pub fn close(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (mut conn, mut client) = memory_pair();

        client.send("from client").await.unwrap();
        assert_eq!(conn.reader.read_frame().await.unwrap().as_deref(), Some("from client"));

        conn.writer.write_frame("from relay".into()).await.unwrap();
        assert_eq!(client.recv().await.as_deref(), Some("from relay"));
    }

    #[tokio::test]
    async fn client_close_is_clean_eof() {
        let (mut conn, mut client) = memory_pair();
        client.close();
        assert_eq!(conn.reader.read_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn write_fails_when_client_stops_receiving() {
        let (mut conn, mut client) = memory_pair();
        client.stop_receiving();
        let err = conn.writer.write_frame("x".into()).await.unwrap_err();
        assert!(matches!(err, TransportError::Write(_)));
    }

    #[tokio::test]
    async fn writer_close_ends_client_stream() {
        let (mut conn, mut client) = memory_pair();
        conn.writer.close().await;
        assert_eq!(client.recv().await, None);
        assert_eq!(
            conn.writer.write_frame("late".into()).await,
            Err(TransportError::Closed)
        );
    }
}
