//! Stream accelerator: WebSocket and server-sent events.
//!
//! # Data Flow
//! ```text
//! client connects (/ws or /sse)
//!     → registry.rs (ceiling check, id, outbound queue)
//!     → server.rs (upgrade, pump frames / events)
//!
//! application
//!     → StreamHandle::broadcast / send → outbound queues
//!     ← StreamHandle::subscribe ← inbound WebSocket frames
//! ```

pub mod registry;
pub mod server;

pub use registry::{
    ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionKind, ConnectionRegistry,
    InboundMessage, Payload, StreamError, StreamHandle,
};
pub use server::StreamServer;
