//! Errors raised by the core components.

use haul_protocol::ProtocolError;
use haul_transport::TransportError;
use thiserror::Error;

/// Startup configuration errors. These abort server construction.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Two channels registered at the same path.
    #[error("Channel already registered at {0}")]
    DuplicateChannel(String),

    /// Channel path is not usable as an upgrade route.
    #[error("Invalid channel path {path:?}: {reason}")]
    InvalidChannelPath { path: String, reason: &'static str },

    /// Request handlers are not in stage order.
    #[error("Handler {handler} ({stage}) cannot follow {previous}")]
    PipelineOrder {
        handler: String,
        stage: String,
        previous: String,
    },
}

/// Failure reported by a build listener.
///
/// The tracker logs it and keeps notifying the remaining listeners.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Encoding a notification failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Delivering a notification failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Any other listener failure.
    #[error("{0}")]
    Other(String),
}
