//! WebSocket endpoint adapter for the browser side
//!
//! Bridges a tungstenite message stream to the byte-oriented
//! [`RelayEndpoint`] the pump works with. Frame-level concerns stay
//! here: Binary and Text frames become payload bytes, Pings are
//! answered transparently, Close (or the stream ending) becomes the
//! empty-read close signal.

use crate::relay::RelayEndpoint;
use futures::{SinkExt, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Browser-facing relay endpoint over an accepted WebSocket.
pub struct WsEndpoint<S> {
    stream: WebSocketStream<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WsEndpoint<S> {
    #[must_use]
    pub const fn new(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RelayEndpoint for WsEndpoint<S> {
    async fn recv(&mut self) -> io::Result<Vec<u8>> {
        loop {
            match self.stream.next().await {
                None => return Ok(Vec::new()),
                // Zero-length data frames are legal WebSocket; only
                // Close and end-of-stream may yield the empty buffer
                // the relay reads as "peer closed".
                Some(Ok(Message::Binary(data))) if data.is_empty() => {}
                Some(Ok(Message::Text(text))) if text.is_empty() => {}
                Some(Ok(Message::Binary(data))) => return Ok(data),
                Some(Ok(Message::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "websocket closed by peer");
                    return Ok(Vec::new());
                }
                Some(Ok(Message::Ping(payload))) => {
                    self.stream
                        .send(Message::Pong(payload))
                        .await
                        .map_err(io::Error::other)?;
                }
                // Pongs and raw frames carry no payload for the relay.
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(io::Error::other(e)),
            }
        }
    }

    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream
            .send(Message::Binary(data.to_vec()))
            .await
            .map_err(io::Error::other)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("websocket close: {e}");
        }
    }
}
