//! # haul-core
//!
//! Build state and realtime channels for the Haul development server.
//!
//! - **Build** - Compiler state machine, listeners and completion waiters
//! - **Mux** - Routes upgrade requests to channels by path
//! - **Live** - Pushes build notifications to client runtimes
//! - **Relay** - Bridges a debugger with client runtimes
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │  Compiler  │────▶│ BuildStateTracker │────▶│ LiveUpdateChannel│
//! └────────────┘     └───────────────────┘     └──────────────────┘
//!                              ▲                        ▲
//!                    settled() │                        │
//! ┌────────────┐     ┌─────────┴─────────┐     ┌────────┴─────────┐
//! │  Requests  │────▶│  Bundle handler   │     │    ChannelMux    │◀── upgrades
//! └────────────┘     └───────────────────┘     └────────┬─────────┘
//!                                                       ▼
//!                                              ┌──────────────────┐
//!                                              │  DebuggerRelay   │
//!                                              └──────────────────┘
//! ```

pub mod build;
pub mod error;
pub mod live;
pub mod mux;
pub mod relay;

pub use build::{
    Artifact, BuildListener, BuildPhase, BuildStateTracker, BuildStats, CompilerEvent,
};
pub use error::{ConfigurationError, ListenerError};
pub use live::{
    BroadcastObserver, BroadcastReport, DefaultReloadPolicy, LiveUpdateChannel, ReloadPolicy,
};
pub use mux::{ChannelHandler, ChannelMux, ChannelMuxBuilder, UpgradeParams};
pub use relay::{DebuggerRelay, DropReason, RelayOutcome, RelayRole, RelayState};
