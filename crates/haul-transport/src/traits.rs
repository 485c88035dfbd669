//! Connection abstraction for Haul channels.
//!
//! A connection is split in two halves: the reading half stays with the task
//! serving the socket, while writes go through a cloneable [`Outbox`] that
//! channels keep in their routing tables.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Counter for process-unique connection ids.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a connection ID from an existing value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a new process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn-{n}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer is gone; nothing can be written anymore.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeds the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// A frame queued for the writer side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A text frame.
    Text(String),
    /// Close the connection with a status code and reason.
    Close { code: u16, reason: String },
}

/// Write handle for a connection.
///
/// Sending never blocks: frames are queued and drained by the connection's
/// writer. Once the writer is gone every send fails with
/// [`TransportError::ConnectionClosed`].
#[derive(Debug, Clone)]
pub struct Outbox {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbox {
    /// Create an outbox and the receiver its writer drains.
    #[must_use]
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { id, tx }, rx)
    }

    /// The connection this outbox writes to.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the writer is gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .send(Outgoing::Text(text.into()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Queue a close frame. Frames queued before it are still delivered.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the writer is gone.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), TransportError> {
        self.tx
            .send(Outgoing::Close {
                code,
                reason: reason.into(),
            })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Check if the writer side is still alive.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// An accepted connection handed to a channel.
#[async_trait]
pub trait Connection: Send {
    /// Get the connection's unique identifier.
    fn id(&self) -> &ConnectionId;

    /// Get a write handle for this connection.
    fn outbox(&self) -> Outbox;

    /// Receive the next text message.
    ///
    /// Returns `None` when the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;

    /// Close the connection with a status code and reason.
    fn close(&self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.outbox().close(code, reason)
    }
}
