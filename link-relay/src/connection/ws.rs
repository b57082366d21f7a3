//! axum WebSocket adapter.

use super::{DuplexConnection, FrameReader, FrameWriter};
use crate::error::TransportError;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

/// Wrap an upgraded WebSocket as a [`DuplexConnection`].
pub fn from_websocket(socket: WebSocket) -> DuplexConnection {
    let (sink, stream) = socket.split();
    DuplexConnection::new(
        Box::new(WsReader { stream }),
        Box::new(WsWriter { sink, closed: false }),
    )
}

struct WsReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameReader for WsReader {
    async fn read_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes)
                        .map(Some)
                        .map_err(|e| TransportError::Read(format!("binary frame is not UTF-8: {}", e)));
                }
                // Keep-alive is answered by the transport.
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::Read(e.to_string())),
            }
        }
    }
}

struct WsWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameWriter for WsWriter {
    async fn write_frame(&mut self, frame: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sink
            .send(Message::Text(frame))
            .await
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            tracing::debug!("WebSocket close frame not sent: {}", e);
        }
    }
}
