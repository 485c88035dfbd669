//! # haul-protocol
//!
//! Wire types exchanged between the Haul development server and its clients.
//!
//! Every message is a JSON envelope with at least a `type` and a `payload`:
//!
//! - `BuildStatus` - Result of the most recent compilation (`GET /status`)
//! - `LiveUpdateMessage` - `building` / `update` / `reload` pushes on the hot channels
//! - `RelayEnvelope` - Messages relayed between the debugger and its clients
//!
//! ## Example
//!
//! ```rust
//! use haul_protocol::{codec, LiveUpdateMessage};
//!
//! let text = codec::encode(&LiveUpdateMessage::building(true)).unwrap();
//! assert_eq!(text, r#"{"type":"building","payload":{"compilingAfterError":true}}"#);
//! ```

pub mod codec;
pub mod live;
pub mod relay;
pub mod status;

pub use codec::{decode_envelope, encode, ProtocolError};
pub use live::{LiveUpdateMessage, ModuleUpdate};
pub use relay::{notice, RelayEnvelope};
pub use status::{BuildStatus, StatusReport};
