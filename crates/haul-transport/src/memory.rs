//! In-process connections.
//!
//! A [`MemoryConnection`] behaves like an accepted socket; its
//! [`MemoryPeer`] plays the remote side. Channel handlers are exercised with
//! these in tests and benchmarks.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, Outbox, Outgoing, TransportError};

/// Create a connected pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let id = ConnectionId::generate();
    let (outbox, outbound) = Outbox::channel(id.clone());
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let connection = MemoryConnection {
        id: id.clone(),
        outbox,
        inbound: inbound_rx,
    };
    let peer = MemoryPeer {
        id,
        inbound: Some(inbound_tx),
        outbound,
    };
    (connection, peer)
}

/// Server side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    outbox: Outbox,
    inbound: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn outbox(&self) -> Outbox {
        self.outbox.clone()
    }

    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.inbound.recv().await)
    }
}

/// Remote side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    id: ConnectionId,
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<Outgoing>,
}

impl MemoryPeer {
    /// Id of the server-side connection.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Send a text message to the server. Returns `false` once hung up.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.inbound
            .as_ref()
            .is_some_and(|tx| tx.send(text.into()).is_ok())
    }

    /// Close the inbound direction; the server sees a clean disconnect.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Stop accepting writes; further server writes fail.
    pub fn break_writes(&mut self) {
        self.outbound.close();
    }

    /// Wait for the next frame written by the server.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.outbound.recv().await
    }

    /// Take the next frame if one is queued.
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.outbound.try_recv().ok()
    }

    /// Take the next text frame if one is queued.
    pub fn try_recv_text(&mut self) -> Option<String> {
        match self.try_recv()? {
            Outgoing::Text(text) => Some(text),
            Outgoing::Close { .. } => None,
        }
    }

    /// Drain every queued text frame.
    pub fn drain_texts(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            if let Outgoing::Text(text) = frame {
                texts.push(text);
            }
        }
        texts
    }
}
