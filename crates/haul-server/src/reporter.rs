//! Console progress for the developer running the server.

use haul_core::{BuildListener, BuildStats, ListenerError};
use haul_protocol::BuildStatus;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Logs when builds start and how they finished.
#[derive(Default)]
pub struct ConsoleReporter {
    started: Mutex<Option<Instant>>,
}

impl ConsoleReporter {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn elapsed(&self) -> Option<Duration> {
        self.started.lock().take().map(|started| started.elapsed())
    }
}

impl BuildListener for ConsoleReporter {
    fn name(&self) -> &str {
        "console"
    }

    fn on_invalid(&self, compiling_after_error: bool) -> Result<(), ListenerError> {
        *self.started.lock() = Some(Instant::now());
        if compiling_after_error {
            info!("Rebuilding after a build with issues");
        } else {
            info!("Rebuilding");
        }
        Ok(())
    }

    fn on_compile(&self, stats: &Arc<BuildStats>) -> Result<(), ListenerError> {
        let elapsed_ms = self.elapsed().map(|d| d.as_millis() as u64);

        match stats.status() {
            BuildStatus::Failed => {
                for message in &stats.errors {
                    error!(hash = %stats.hash, "{message}");
                }
                error!(hash = %stats.hash, errors = stats.errors.len(), elapsed_ms, "Build failed");
            }
            BuildStatus::SuccessWithWarnings => {
                for message in &stats.warnings {
                    warn!(hash = %stats.hash, "{message}");
                }
                warn!(
                    hash = %stats.hash,
                    warnings = stats.warnings.len(),
                    elapsed_ms,
                    "Build finished with warnings"
                );
            }
            _ => info!(
                hash = %stats.hash,
                modules = stats.modules.len(),
                bundles = ?stats.artifact_paths(),
                elapsed_ms,
                "Build finished"
            ),
        }
        Ok(())
    }
}
