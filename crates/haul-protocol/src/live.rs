//! Messages pushed on the live-update channels.
//!
//! Clients keep one socket open per runtime flavor and react to three
//! message types: `building` when a rebuild starts, `update` with the
//! changed modules once it finishes, or `reload` when the change cannot be
//! applied in place.

use serde::{Deserialize, Serialize};

/// A module touched by the last compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleUpdate {
    /// Compiler-assigned module id.
    pub id: String,
    /// Human readable module name (usually the source path).
    pub name: String,
    /// Whether the module can be swapped without a full reload.
    #[serde(default = "default_hot")]
    pub hot: bool,
}

fn default_hot() -> bool {
    true
}

impl ModuleUpdate {
    /// Create a hot-updatable module entry.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            hot: true,
        }
    }

    /// Mark the module as requiring a full reload.
    #[must_use]
    pub fn cold(mut self) -> Self {
        self.hot = false;
        self
    }
}

/// A live-update notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum LiveUpdateMessage {
    /// A rebuild started.
    Building {
        /// Whether the previous completed build had errors or warnings.
        #[serde(rename = "compilingAfterError")]
        compiling_after_error: bool,
    },

    /// A rebuild finished and can be applied incrementally.
    Update {
        hash: String,
        modules: Vec<ModuleUpdate>,
        #[serde(default)]
        errors: Vec<String>,
        #[serde(default)]
        warnings: Vec<String>,
    },

    /// A rebuild finished and the client must reload the whole bundle.
    Reload { hash: String },
}

impl LiveUpdateMessage {
    /// Create a `building` message.
    #[must_use]
    pub fn building(compiling_after_error: bool) -> Self {
        LiveUpdateMessage::Building {
            compiling_after_error,
        }
    }

    /// Create a `reload` message.
    #[must_use]
    pub fn reload(hash: impl Into<String>) -> Self {
        LiveUpdateMessage::Reload { hash: hash.into() }
    }

    /// The `type` tag of this message.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            LiveUpdateMessage::Building { .. } => "building",
            LiveUpdateMessage::Update { .. } => "update",
            LiveUpdateMessage::Reload { .. } => "reload",
        }
    }
}
