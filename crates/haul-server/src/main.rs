//! # Haul Server
//!
//! Development server for React Native bundles.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings, compiler events on stdin
//! bundler --watch --json | haul
//!
//! # Run with custom config
//! haul /path/to/haul.toml
//!
//! # Run with environment variables
//! HAUL_PORT=8081 HAUL_HOST=0.0.0.0 HAUL_LAZY=1 haul
//! ```

use anyhow::Result;
use haul_server::{config::Config, handlers};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haul=debug,haul_server=debug,haul_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    tracing::info!("Starting Haul server on {}:{}", config.host, config.port);

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
