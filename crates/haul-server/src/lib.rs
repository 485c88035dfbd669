//! # haul-server
//!
//! The Haul development server: serves compiled bundles, pushes build
//! notifications to connected apps and relays the remote debugger.

pub mod compiler;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod reporter;

pub use config::Config;
pub use handlers::{build_app, run_server, AppState};
