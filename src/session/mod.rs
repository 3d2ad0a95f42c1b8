//! # Client Sessions
//!
//! One session per WebSocket connection. The transport side lives in
//! `src/websocket.rs`; this module holds what does not depend on it.
//!
//! ## Key Components:
//! - **Protocol**: Inbound/outbound JSON message types
//! - **Handler**: Per-frame protocol logic (trigger gate, intent, weather lookup)
//! - **Registry**: Set of live sessions for diagnostics

pub mod handler;
pub mod protocol;
pub mod registry;

pub use handler::SessionHandler;
pub use protocol::OutboundMessage;
pub use registry::ConnectionRegistry;
