//! Compiler statistics and artifacts.

use bytes::Bytes;
use haul_protocol::{BuildStatus, ModuleUpdate};
use std::collections::HashMap;

/// A compiled output file held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// File contents.
    pub content: Bytes,
    /// MIME type used when serving it.
    pub content_type: String,
}

impl Artifact {
    /// Create an artifact with an explicit content type.
    #[must_use]
    pub fn new(content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }

    /// Create an artifact, picking the content type from the file name.
    #[must_use]
    pub fn for_path(path: &str, content: impl Into<Bytes>) -> Self {
        Self::new(content, content_type_for(path))
    }
}

/// MIME type for a compiled file name.
#[must_use]
pub fn content_type_for(path: &str) -> &'static str {
    let extension = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    match extension {
        "bundle" | "js" => "application/javascript",
        "map" | "json" => "application/json",
        "html" => "text/html; charset=utf-8",
        "css" => "text/css",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}

/// Normalize an artifact path to the form used in request URIs.
fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// Statistics reported by the compiler when a build finishes.
#[derive(Debug, Clone, Default)]
pub struct BuildStats {
    /// Compilation hash.
    pub hash: String,
    /// Error messages.
    pub errors: Vec<String>,
    /// Warning messages.
    pub warnings: Vec<String>,
    /// Modules changed by this build.
    pub modules: Vec<ModuleUpdate>,
    /// Set when the compiler knows the change cannot be applied in place.
    pub full_reload: bool,
    /// Compiled outputs keyed by request path (always starting with `/`).
    artifacts: HashMap<String, Artifact>,
}

impl BuildStats {
    /// Create empty stats for a compilation.
    #[must_use]
    pub fn new(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    #[must_use]
    pub fn with_module(mut self, module: ModuleUpdate) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn with_full_reload(mut self) -> Self {
        self.full_reload = true;
        self
    }

    #[must_use]
    pub fn with_artifact(mut self, path: &str, artifact: Artifact) -> Self {
        self.insert_artifact(path, artifact);
        self
    }

    /// Add a compiled output.
    pub fn insert_artifact(&mut self, path: &str, artifact: Artifact) {
        self.artifacts.insert(normalize(path), artifact);
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Errors or warnings were reported.
    #[must_use]
    pub fn has_issues(&self) -> bool {
        self.has_errors() || self.has_warnings()
    }

    /// Status this build resolves to.
    #[must_use]
    pub fn status(&self) -> BuildStatus {
        BuildStatus::from_outcome(self.has_errors(), self.has_warnings())
    }

    /// Look up a compiled output by request path.
    #[must_use]
    pub fn artifact(&self, path: &str) -> Option<&Artifact> {
        self.artifacts.get(path)
    }

    /// All artifact paths, sorted.
    #[must_use]
    pub fn artifact_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.artifacts.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}
