//! Live-update channel.
//!
//! Keeps the sockets of one client runtime flavor and pushes build
//! notifications to all of them. A connection whose write fails is dropped
//! from the set; clients are expected to reconnect on their own.

use crate::build::{BuildListener, BuildStats};
use crate::error::ListenerError;
use crate::mux::{ChannelHandler, UpgradeParams};
use async_trait::async_trait;
use dashmap::DashMap;
use haul_protocol::{codec, LiveUpdateMessage, ProtocolError};
use haul_transport::{Connection, ConnectionId, Outbox};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Decides whether a finished build needs a full reload.
pub trait ReloadPolicy: Send + Sync {
    fn requires_full_reload(&self, stats: &BuildStats) -> bool;
}

/// Reloads when the compiler asks for it or a changed module cannot be
/// hot-swapped. Builds with errors are always sent as updates so clients
/// can show them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultReloadPolicy;

impl ReloadPolicy for DefaultReloadPolicy {
    fn requires_full_reload(&self, stats: &BuildStats) -> bool {
        if stats.has_errors() {
            return false;
        }
        stats.full_reload || stats.modules.iter().any(|m| !m.hot)
    }
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections removed because the write failed.
    pub dropped: usize,
}

/// Told about every finished broadcast, e.g. to record delivery counts.
pub trait BroadcastObserver: Send + Sync {
    fn on_broadcast(&self, channel: &str, kind: &'static str, report: BroadcastReport);
}

/// A live-update channel for one client runtime flavor.
pub struct LiveUpdateChannel {
    name: String,
    connections: DashMap<ConnectionId, Outbox>,
    policy: Box<dyn ReloadPolicy>,
    observer: Option<Arc<dyn BroadcastObserver>>,
}

impl LiveUpdateChannel {
    /// Create a channel with the default reload policy.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_policy(name, DefaultReloadPolicy)
    }

    /// Create a channel with a custom reload policy.
    #[must_use]
    pub fn with_policy(name: impl Into<String>, policy: impl ReloadPolicy + 'static) -> Self {
        Self {
            name: name.into(),
            connections: DashMap::new(),
            policy: Box::new(policy),
            observer: None,
        }
    }

    /// Report every broadcast to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn BroadcastObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Add a connection to the open set.
    pub fn add(&self, outbox: Outbox) {
        debug!(channel = %self.name, connection = %outbox.id(), "Live-update client connected");
        self.connections.insert(outbox.id().clone(), outbox);
    }

    /// Remove a connection. Returns `true` if it was open.
    pub fn remove(&self, id: &ConnectionId) -> bool {
        self.connections.remove(id).is_some()
    }

    /// Check if a connection is in the open set.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of open connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// The message clients should receive for a finished build.
    #[must_use]
    pub fn message_for(&self, stats: &BuildStats) -> LiveUpdateMessage {
        if self.policy.requires_full_reload(stats) {
            LiveUpdateMessage::reload(stats.hash.clone())
        } else {
            LiveUpdateMessage::Update {
                hash: stats.hash.clone(),
                modules: stats.modules.clone(),
                errors: stats.errors.clone(),
                warnings: stats.warnings.clone(),
            }
        }
    }

    /// Send a message to every open connection.
    ///
    /// Iterates over a snapshot of the set; failed connections are removed
    /// once the iteration is over.
    ///
    /// # Errors
    ///
    /// Returns an error if the message cannot be encoded.
    pub fn broadcast(&self, message: &LiveUpdateMessage) -> Result<BroadcastReport, ProtocolError> {
        let text = codec::encode(message)?;
        let targets: Vec<Outbox> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for outbox in targets {
            match outbox.send_text(text.as_str()) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        channel = %self.name,
                        connection = %outbox.id(),
                        error = %e,
                        "Write failed, dropping live-update client"
                    );
                    failed.push(outbox.id().clone());
                }
            }
        }

        for id in failed {
            if self.remove(&id) {
                report.dropped += 1;
            }
        }

        debug!(
            channel = %self.name,
            kind = message.kind(),
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast live update"
        );
        if let Some(observer) = &self.observer {
            observer.on_broadcast(&self.name, message.kind(), report);
        }
        Ok(report)
    }
}

impl BuildListener for LiveUpdateChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_invalid(&self, compiling_after_error: bool) -> Result<(), ListenerError> {
        self.broadcast(&LiveUpdateMessage::building(compiling_after_error))?;
        Ok(())
    }

    fn on_compile(&self, stats: &Arc<BuildStats>) -> Result<(), ListenerError> {
        self.broadcast(&self.message_for(stats))?;
        Ok(())
    }
}

#[async_trait]
impl ChannelHandler for LiveUpdateChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn serve(&self, mut connection: Box<dyn Connection>, _params: UpgradeParams) {
        let id = connection.id().clone();
        self.add(connection.outbox());

        loop {
            match connection.recv().await {
                Ok(Some(text)) => {
                    trace!(channel = %self.name, connection = %id, len = text.len(), "Ignoring client message");
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(channel = %self.name, connection = %id, error = %e, "Live-update connection failed");
                    break;
                }
            }
        }

        self.remove(&id);
        debug!(channel = %self.name, connection = %id, "Live-update client disconnected");
    }
}
