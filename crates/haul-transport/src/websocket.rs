//! WebSocket transport on top of axum's upgraded sockets.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::traits::{Connection, ConnectionId, Outbox, Outgoing, TransportError};

/// Default maximum inbound message size (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// An upgraded WebSocket connection.
///
/// Writes are drained by a dedicated task; when that task ends (peer gone or
/// close frame sent) every [`Outbox`] for this connection starts failing.
pub struct WebSocketConnection {
    id: ConnectionId,
    outbox: Outbox,
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket and spawn its writer task.
    #[must_use]
    pub fn new(socket: WebSocket, max_message_size: usize) -> Self {
        let id = ConnectionId::generate();
        let (sink, stream) = socket.split();
        let (outbox, rx) = Outbox::channel(id.clone());

        tokio::spawn(write_loop(id.clone(), sink, rx));

        Self {
            id,
            outbox,
            stream,
            max_message_size,
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = rx.recv().await {
        let (message, closing) = match outgoing {
            Outgoing::Text(text) => (Message::Text(text), false),
            Outgoing::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if let Err(e) = sink.send(message).await {
            debug!(connection = %id, error = %e, "WebSocket write failed");
            break;
        }
        if closing {
            trace!(connection = %id, "Close frame sent");
            break;
        }
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.max_message_size {
                        warn!(
                            connection = %self.id,
                            size = text.len(),
                            max = self.max_message_size,
                            "Message too large"
                        );
                        return Err(TransportError::MessageTooLarge {
                            size: text.len(),
                            max: self.max_message_size,
                        });
                    }
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        warn!(connection = %self.id, "Dropping non UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // tungstenite answers pings on its own
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
