//! Bridge from the bundler process to the build tracker.
//!
//! The bundler writes one JSON object per line:
//!
//! ```text
//! {"event":"invalidated"}
//! {"event":"done","hash":"a1","errors":[],"warnings":[],"modules":[{"id":3,"name":"./App.js"}],
//!  "fullReload":false,"outputPath":"dist","assets":["index.ios.bundle"]}
//! ```
//!
//! Assets listed by a `done` event are read into memory before the event is
//! forwarded, so every completion carries its own artifacts.

use haul_core::{Artifact, BuildStats, CompilerEvent};
use haul_protocol::ModuleUpdate;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bridge failures.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid compiler event: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read compiler events: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum BridgeEvent {
    Invalidated,
    Done(DoneEvent),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoneEvent {
    hash: String,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    modules: Vec<BridgeModule>,
    #[serde(default)]
    full_reload: bool,
    #[serde(default)]
    output_path: PathBuf,
    #[serde(default)]
    assets: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BridgeModule {
    // Bundlers use numeric or string ids.
    id: Value,
    name: String,
    #[serde(default = "default_hot")]
    hot: bool,
}

fn default_hot() -> bool {
    true
}

impl From<BridgeModule> for ModuleUpdate {
    fn from(module: BridgeModule) -> Self {
        let id = match module.id {
            Value::String(id) => id,
            other => other.to_string(),
        };
        let update = ModuleUpdate::new(id, module.name);
        if module.hot {
            update
        } else {
            update.cold()
        }
    }
}

impl DoneEvent {
    async fn into_stats(self) -> BuildStats {
        let mut stats = BuildStats::new(self.hash);
        stats.errors = self.errors;
        stats.warnings = self.warnings;
        stats.modules = self.modules.into_iter().map(ModuleUpdate::from).collect();
        stats.full_reload = self.full_reload;

        for asset in &self.assets {
            let path = self.output_path.join(asset.trim_start_matches('/'));
            match tokio::fs::read(&path).await {
                Ok(content) => stats.insert_artifact(asset, Artifact::for_path(asset, content)),
                Err(e) => warn!(asset = %path.display(), error = %e, "Skipping unreadable asset"),
            }
        }
        stats
    }
}

/// Parse one line of the event feed. Blank lines yield `None`.
///
/// # Errors
///
/// Returns [`BridgeError::Parse`] if the line is not a known event.
async fn parse_line(line: &str) -> Result<Option<CompilerEvent>, BridgeError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let event = match serde_json::from_str::<BridgeEvent>(line)? {
        BridgeEvent::Invalidated => CompilerEvent::Invalidated,
        BridgeEvent::Done(done) => CompilerEvent::Done(done.into_stats().await),
    };
    Ok(Some(event))
}

/// Forward events from a line-delimited reader until it ends or the
/// receiving side closes. Unparseable lines are logged and skipped.
///
/// # Errors
///
/// Returns [`BridgeError::Io`] if reading fails.
pub async fn forward<R>(reader: R, events: mpsc::Sender<CompilerEvent>) -> Result<(), BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let event = match parse_line(&line).await {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Skipping compiler event");
                continue;
            }
        };
        if let CompilerEvent::Done(stats) = &event {
            debug!(hash = %stats.hash, artifacts = stats.artifact_paths().len(), "Compiler finished");
        }
        if events.send(event).await.is_err() {
            debug!("Build tracker stopped, closing compiler bridge");
            break;
        }
    }
    Ok(())
}

/// Read compiler events from stdin in a background task.
pub fn spawn_stdin(events: mpsc::Sender<CompilerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Reading compiler events from stdin");
        match forward(BufReader::new(tokio::io::stdin()), events).await {
            Ok(()) => info!("Compiler event feed ended"),
            Err(e) => warn!(error = %e, "Compiler event feed failed"),
        }
    })
}
