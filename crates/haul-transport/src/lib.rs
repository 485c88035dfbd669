//! # haul-transport
//!
//! Connection layer for Haul channels.
//!
//! - **WebSocket** - Sockets upgraded by the axum server
//! - **Memory** - In-process pairs for tests and benchmarks
//!
//! ## Connection Abstraction
//!
//! Channel handlers only see the `Connection` trait: a reading half plus a
//! cloneable `Outbox` for writes.
//!
//! ```rust,ignore
//! use haul_transport::Connection;
//!
//! async fn serve(mut conn: Box<dyn Connection>) {
//!     let outbox = conn.outbox();
//!     while let Ok(Some(text)) = conn.recv().await {
//!         let _ = outbox.send_text(text);
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, Outbox, Outgoing, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
