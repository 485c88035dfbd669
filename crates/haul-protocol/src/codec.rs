//! JSON codec for Haul envelopes.

use serde::Serialize;
use thiserror::Error;

use crate::relay::RelayEnvelope;

/// Protocol errors. All of them are recovered locally: the offending
/// message or connection is rejected and everything else keeps running.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message is not a JSON object with a string `type`.
    #[error("Malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The message could not be serialized.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// No channel is registered at the upgrade path.
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// A second debugger tried to attach.
    #[error("A debugger is already attached")]
    DebuggerAlreadyAttached,

    /// The relay role query parameter is missing or unknown.
    #[error("Invalid relay role: {0}")]
    InvalidRole(String),
}

/// Encode a message to its JSON text form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    serde_json::to_string(message).map_err(ProtocolError::Encode)
}

/// Decode a relay envelope from a text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] if the text is not an envelope.
pub fn decode_envelope(text: &str) -> Result<RelayEnvelope, ProtocolError> {
    serde_json::from_str(text).map_err(ProtocolError::Malformed)
}
