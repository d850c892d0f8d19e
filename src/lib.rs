//! SignalHub - WebRTC signaling relay
//!
//! Peers register under an id over WebSocket or HTTP long polling and
//! exchange offers, answers and ICE candidates by peer id. Peers held by
//! other relay processes are reached through a shared directory: each
//! process publishes where its peers live and drains its own queue of
//! batches pushed by the others.

pub mod aggregator;
pub mod cli;
pub mod compact;
pub mod config;
pub mod directory;
pub mod error;
pub mod logging;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod timer;
pub mod version;

pub use config::RelayConfig;
pub use error::{Error, Result};
pub use relay::Relay;
