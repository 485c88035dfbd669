//! Build status reported to clients.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of the most recent compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildStatus {
    /// A build is in flight (or none has finished yet).
    Compiling,
    /// Last build finished without errors or warnings.
    Success,
    /// Last build finished with warnings only.
    SuccessWithWarnings,
    /// Last build reported errors.
    Failed,
}

impl BuildStatus {
    /// Derive the status of a finished build.
    ///
    /// Errors take precedence over warnings.
    #[must_use]
    pub fn from_outcome(has_errors: bool, has_warnings: bool) -> Self {
        match (has_errors, has_warnings) {
            (true, _) => BuildStatus::Failed,
            (false, true) => BuildStatus::SuccessWithWarnings,
            (false, false) => BuildStatus::Success,
        }
    }

    /// Whether a build is currently running.
    #[must_use]
    pub fn is_compiling(self) -> bool {
        matches!(self, BuildStatus::Compiling)
    }

    /// The name used on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Compiling => "Compiling",
            BuildStatus::Success => "Success",
            BuildStatus::SuccessWithWarnings => "SuccessWithWarnings",
            BuildStatus::Failed => "Failed",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: BuildStatus,
}
