//! Wire formats
//!
//! Clients exchange JSON objects over WebSocket frames or HTTP bodies.
//! Relay processes exchange protobuf-encoded batches through the
//! directory queues.

mod batch;
mod messages;

pub use batch::*;
pub use messages::*;
