//! Debugger relay channel.
//!
//! Bridges one debugger connection with any number of client connections.
//!
//! ```text
//!  client A ──┐                         ┌── client A
//!  client B ──┼──▶ tag "client" ──▶ debugger ──▶ route by "client" ──┼── client B
//!  client C ──┘                         └── (no tag: every client)
//! ```
//!
//! Without a debugger, client messages are dropped and each client is told
//! once that a debugger is pending. Losing the debugger pauses the session:
//! clients stay connected and resume when a new debugger attaches.

use crate::mux::{ChannelHandler, UpgradeParams};
use async_trait::async_trait;
use haul_protocol::{codec, notice, ProtocolError, RelayEnvelope};
use haul_transport::{Connection, ConnectionId, Outbox};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Close code for a rejected debugger.
pub const CLOSE_DEBUGGER_TAKEN: u16 = 1011;

/// Close code for an invalid role.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Role of a relay connection, taken from the `role` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRole {
    Debugger,
    Client,
}

impl RelayRole {
    /// Read the role from upgrade parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRole`] for a missing or unknown role.
    pub fn from_params(params: &UpgradeParams) -> Result<Self, ProtocolError> {
        match params.get("role") {
            Some("debugger") => Ok(RelayRole::Debugger),
            Some("client") => Ok(RelayRole::Client),
            Some(other) => Err(ProtocolError::InvalidRole(other.to_string())),
            None => Err(ProtocolError::InvalidRole(String::new())),
        }
    }
}

/// Relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    NoDebugger,
    Attached,
}

/// Why a message was not delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Not a valid envelope.
    Malformed,
    /// No debugger to deliver to.
    NoDebugger,
    /// The sender is not a known debugger or client of this relay.
    UnknownSender,
    /// The addressed client is not connected.
    UnknownClient(String),
}

/// What happened to a relayed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Delivered to this many connections.
    Forwarded(usize),
    /// Not delivered.
    Dropped(DropReason),
}

struct ClientEntry {
    outbox: Outbox,
    pending_notified: bool,
}

#[derive(Default)]
struct RoutingTable {
    debugger: Option<Outbox>,
    clients: BTreeMap<ConnectionId, ClientEntry>,
}

fn encode_envelope(envelope: &RelayEnvelope) -> Option<String> {
    match codec::encode(envelope) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(kind = %envelope.kind, error = %e, "Failed to encode relay envelope");
            None
        }
    }
}

impl RoutingTable {
    fn is_debugger(&self, id: &ConnectionId) -> bool {
        self.debugger.as_ref().is_some_and(|d| d.id() == id)
    }

    /// Write to the debugger; a failed write detaches it.
    fn send_to_debugger(&mut self, text: &str) -> bool {
        let Some(debugger) = self.debugger.as_ref() else {
            return false;
        };
        if debugger.send_text(text).is_ok() {
            return true;
        }
        warn!(connection = %debugger.id(), "Debugger write failed, detaching");
        self.detach();
        false
    }

    /// Write to one client; a failed write removes it.
    fn send_to_client(&mut self, id: &ConnectionId, text: &str) -> bool {
        let Some(entry) = self.clients.get(id) else {
            return false;
        };
        if entry.outbox.send_text(text).is_ok() {
            return true;
        }
        warn!(connection = %id, "Client write failed, removing");
        self.remove_client(id);
        false
    }

    /// Write to every client; failed clients are removed afterwards.
    fn broadcast_to_clients(&mut self, text: &str) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, entry) in &self.clients {
            if entry.outbox.send_text(text).is_ok() {
                delivered += 1;
            } else {
                failed.push(id.clone());
            }
        }
        for id in failed {
            warn!(connection = %id, "Client write failed, removing");
            self.remove_client(&id);
        }
        delivered
    }

    fn remove_client(&mut self, id: &ConnectionId) -> bool {
        if self.clients.remove(id).is_none() {
            return false;
        }
        if let Some(text) = encode_envelope(&notice::client_disconnected(id.as_str())) {
            self.send_to_debugger(&text);
        }
        true
    }

    fn detach(&mut self) {
        if self.debugger.take().is_some() {
            if let Some(text) = encode_envelope(&notice::debugger_detached()) {
                self.broadcast_to_clients(&text);
            }
        }
    }
}

/// The debugger relay channel.
pub struct DebuggerRelay {
    name: String,
    table: Mutex<RoutingTable>,
}

impl DebuggerRelay {
    /// Create a relay with no debugger attached.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: Mutex::new(RoutingTable::default()),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RelayState {
        if self.table.lock().debugger.is_some() {
            RelayState::Attached
        } else {
            RelayState::NoDebugger
        }
    }

    /// Id of the attached debugger.
    #[must_use]
    pub fn debugger_id(&self) -> Option<ConnectionId> {
        self.table.lock().debugger.as_ref().map(|d| d.id().clone())
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.table.lock().clients.len()
    }

    /// Attach a debugger.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::DebuggerAlreadyAttached`] if a live debugger
    /// is attached already; it keeps its session.
    pub fn attach_debugger(&self, outbox: Outbox) -> Result<(), ProtocolError> {
        let mut table = self.table.lock();

        if let Some(current) = table.debugger.as_ref() {
            if current.is_open() {
                warn!(
                    channel = %self.name,
                    attached = %current.id(),
                    rejected = %outbox.id(),
                    "Rejecting second debugger"
                );
                return Err(ProtocolError::DebuggerAlreadyAttached);
            }
            debug!(channel = %self.name, connection = %current.id(), "Replacing dead debugger");
            table.detach();
        }

        info!(channel = %self.name, connection = %outbox.id(), "Debugger attached");
        table.debugger = Some(outbox);

        for entry in table.clients.values_mut() {
            entry.pending_notified = false;
        }
        if let Some(text) = encode_envelope(&notice::debugger_attached()) {
            table.broadcast_to_clients(&text);
        }

        let clients: Vec<ConnectionId> = table.clients.keys().cloned().collect();
        for id in clients {
            if let Some(text) = encode_envelope(&notice::client_connected(id.as_str())) {
                if !table.send_to_debugger(&text) {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Detach the debugger if `id` is the attached one.
    pub fn detach_debugger(&self, id: &ConnectionId) -> bool {
        let mut table = self.table.lock();
        if !table.is_debugger(id) {
            return false;
        }
        info!(channel = %self.name, connection = %id, "Debugger detached, pausing clients");
        table.detach();
        true
    }

    /// Register a client connection.
    pub fn join_client(&self, outbox: Outbox) {
        let mut table = self.table.lock();
        let id = outbox.id().clone();
        debug!(channel = %self.name, connection = %id, "Relay client connected");

        table.clients.insert(
            id.clone(),
            ClientEntry {
                outbox,
                pending_notified: false,
            },
        );
        if let Some(text) = encode_envelope(&notice::client_connected(id.as_str())) {
            table.send_to_debugger(&text);
        }
    }

    /// Remove a client connection and tell the debugger.
    pub fn leave_client(&self, id: &ConnectionId) -> bool {
        let removed = self.table.lock().remove_client(id);
        if removed {
            debug!(channel = %self.name, connection = %id, "Relay client disconnected");
        }
        removed
    }

    /// Relay a message sent by a client.
    pub fn from_client(&self, id: &ConnectionId, text: &str) -> RelayOutcome {
        let mut envelope = match codec::decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %self.name, connection = %id, error = %e, "Dropping malformed client message");
                return RelayOutcome::Dropped(DropReason::Malformed);
            }
        };

        let mut guard = self.table.lock();
        let table = &mut *guard;
        let Some(entry) = table.clients.get_mut(id) else {
            return RelayOutcome::Dropped(DropReason::UnknownSender);
        };

        if table.debugger.is_none() {
            let first_drop = !entry.pending_notified;
            entry.pending_notified = true;
            if first_drop {
                if let Some(text) = encode_envelope(&notice::debugger_pending()) {
                    table.send_to_client(id, &text);
                }
            }
            debug!(channel = %self.name, connection = %id, kind = %envelope.kind, "No debugger attached, dropping");
            return RelayOutcome::Dropped(DropReason::NoDebugger);
        }

        envelope.client = Some(id.to_string());
        let Some(text) = encode_envelope(&envelope) else {
            return RelayOutcome::Dropped(DropReason::Malformed);
        };
        if table.send_to_debugger(&text) {
            RelayOutcome::Forwarded(1)
        } else {
            RelayOutcome::Dropped(DropReason::NoDebugger)
        }
    }

    /// Relay a message sent by the debugger.
    pub fn from_debugger(&self, id: &ConnectionId, text: &str) -> RelayOutcome {
        let mut envelope = match codec::decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(channel = %self.name, connection = %id, error = %e, "Dropping malformed debugger message");
                return RelayOutcome::Dropped(DropReason::Malformed);
            }
        };

        let mut table = self.table.lock();
        if !table.is_debugger(id) {
            return RelayOutcome::Dropped(DropReason::UnknownSender);
        }

        let target = envelope.take_client();
        let Some(text) = encode_envelope(&envelope) else {
            return RelayOutcome::Dropped(DropReason::Malformed);
        };

        match target {
            Some(client) => {
                let client_id = ConnectionId::from(client);
                if !table.clients.contains_key(&client_id) {
                    warn!(channel = %self.name, client = %client_id, "Debugger addressed unknown client");
                    return RelayOutcome::Dropped(DropReason::UnknownClient(client_id.0));
                }
                if table.send_to_client(&client_id, &text) {
                    RelayOutcome::Forwarded(1)
                } else {
                    RelayOutcome::Dropped(DropReason::UnknownClient(client_id.0))
                }
            }
            None => RelayOutcome::Forwarded(table.broadcast_to_clients(&text)),
        }
    }
}

#[async_trait]
impl ChannelHandler for DebuggerRelay {
    fn name(&self) -> &str {
        &self.name
    }

    fn admit(&self, params: &UpgradeParams) -> Result<(), ProtocolError> {
        let role = RelayRole::from_params(params)?;
        let taken = role == RelayRole::Debugger
            && self.table.lock().debugger.as_ref().is_some_and(Outbox::is_open);
        if taken {
            return Err(ProtocolError::DebuggerAlreadyAttached);
        }
        Ok(())
    }

    async fn serve(&self, mut connection: Box<dyn Connection>, params: UpgradeParams) {
        let id = connection.id().clone();
        let role = match RelayRole::from_params(&params) {
            Ok(role) => role,
            Err(e) => {
                warn!(channel = %self.name, connection = %id, error = %e, "Rejecting relay connection");
                if let Err(close_error) = connection.close(CLOSE_POLICY_VIOLATION, &e.to_string()) {
                    debug!(channel = %self.name, connection = %id, error = %close_error, "Close failed");
                }
                return;
            }
        };

        match role {
            RelayRole::Debugger => {
                if let Err(e) = self.attach_debugger(connection.outbox()) {
                    if let Err(close_error) = connection.close(CLOSE_DEBUGGER_TAKEN, &e.to_string()) {
                        debug!(channel = %self.name, connection = %id, error = %close_error, "Close failed");
                    }
                    return;
                }
            }
            RelayRole::Client => self.join_client(connection.outbox()),
        }

        loop {
            match connection.recv().await {
                Ok(Some(text)) => {
                    let outcome = match role {
                        RelayRole::Debugger => self.from_debugger(&id, &text),
                        RelayRole::Client => self.from_client(&id, &text),
                    };
                    debug!(channel = %self.name, connection = %id, ?outcome, "Relayed message");
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(channel = %self.name, connection = %id, error = %e, "Relay connection failed");
                    break;
                }
            }
        }

        match role {
            RelayRole::Debugger => {
                self.detach_debugger(&id);
            }
            RelayRole::Client => {
                self.leave_client(&id);
            }
        }
    }
}
